/// JSON bodies exchanged between the matching server and its clients.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::criteria::Criterion;
use crate::provider::Provider;

pub const DEFAULT_TOP_K: i64 = 20;
pub const DEFAULT_BATCH_SIZE: i64 = 5;
pub const DEFAULT_SEARCH_COUNT: i64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSource {
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// One scored vendor, from either the repository or a web search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorEvaluation {
    pub name: String,
    pub composite_score: f64,
    #[serde(default)]
    pub justification: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub web_sources: Vec<WebSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Per-criterion scores under `{key}_score` fields.
    #[serde(flatten)]
    pub scores: BTreeMap<String, f64>,
}

impl VendorEvaluation {
    pub fn score(&self, criterion: &Criterion) -> f64 {
        self.scores
            .get(&criterion.score_field())
            .copied()
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemStatementSubmission {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub outcomes: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ps_id: Option<String>,
    pub llm_provider: Provider,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemStatementRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub outcomes: String,
    pub full_statement: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemStatementSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub outcomes: String,
    pub has_analysis: bool,
    /// First two analysis fields, metadata excluded.
    pub analysis: Option<Value>,
    pub has_embedding: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemStatementDetail {
    pub id: String,
    pub title: String,
    pub description: String,
    pub outcomes: String,
    pub full_statement: String,
    pub analysis: Option<Value>,
    pub has_embedding: bool,
    pub embedding_dimensions: usize,
    pub llm_provider: Provider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorSummary {
    pub name: String,
    pub text_preview: String,
    pub full_text_length: usize,
    pub capabilities: Option<Value>,
    pub has_embedding: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorList {
    pub total: usize,
    pub vendors: Vec<VendorSummary>,
    pub llm_provider: Provider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorDetail {
    pub name: String,
    pub full_text: String,
    pub text_length: usize,
    pub capabilities: Option<Value>,
    pub has_embedding: bool,
    pub embedding_dimensions: usize,
    pub llm_provider: Provider,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub message: String,
    pub deleted_from: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    pub database: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dashboard {
    pub total_vendors: usize,
    pub total_ps: usize,
    pub cached_analyses: usize,
    pub recent_vendors: Vec<String>,
    pub recent_ps: Vec<String>,
}

/// Repository matching request. Counts are signed so out-of-range values reach validation
/// instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    #[serde(default)]
    pub ps_id: String,
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

fn default_top_k() -> i64 {
    DEFAULT_TOP_K
}

fn default_batch_size() -> i64 {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub vendors_from_cache: usize,
    pub vendors_processed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    pub problem_statement: ProblemStatementRecord,
    pub results: Vec<VendorEvaluation>,
    pub total_vendors_analyzed: usize,
    pub shortlisted_vendors: usize,
    pub top_composite_score: f64,
    pub cache_stats: CacheStats,
    pub llm_provider: Provider,
}

/// A web-search evaluation parameter; weights are percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationParam {
    pub name: String,
    pub weight: f64,
}

impl From<&EvaluationParam> for Criterion {
    fn from(param: &EvaluationParam) -> Self {
        Criterion::new(param.name.trim(), param.weight)
    }
}

impl From<&Criterion> for EvaluationParam {
    fn from(criterion: &Criterion) -> Self {
        Self {
            name: criterion.label.clone(),
            weight: criterion.weight,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchRequest {
    #[serde(default)]
    pub ps_id: String,
    #[serde(default = "default_search_count")]
    pub count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_provider: Option<String>,
    /// `None` selects the default parameters; an empty list is rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation_params: Option<Vec<EvaluationParam>>,
}

fn default_search_count() -> i64 {
    DEFAULT_SEARCH_COUNT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchResponse {
    pub problem_statement_id: String,
    pub llm_provider: Provider,
    pub total_found: usize,
    pub sources_count: usize,
    pub top_score: f64,
    pub vendors: Vec<VendorEvaluation>,
    pub evaluation_params: Vec<EvaluationParam>,
    /// Set when the search produced no parseable vendors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_results_preview: Option<String>,
}
