/// Repository matching: cosine shortlist, then batched LLM scoring.
///
/// A batch whose LLM call or output parsing fails is not an error for the request; every
/// vendor in it gets a score derived from semantic similarity instead.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info, warn};

use matching_common::api::{CacheStats, VendorEvaluation};
use matching_common::criteria::{composite_score, round_to, score_from_value, Criterion, WeightUnit};
use matching_common::embedding::cosine_similarity;
use matching_common::json_text::field_strings;
use matching_common::llm::{parse_json_output, ChatModel};
use matching_common::openai::LlmError;

use crate::analysis::Analyzer;
use crate::error::AppError;
use crate::model::ProblemStatement;
use crate::store::Repository;

pub const FALLBACK_JUSTIFICATION: &str =
    "LLM evaluation failed; fallback score from semantic similarity.";

#[derive(Debug, Clone)]
pub struct Candidate {
    pub name: String,
    pub capabilities: Value,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct ShortlistEntry {
    pub name: String,
    pub similarity: f64,
    pub capabilities: Value,
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub results: Vec<VendorEvaluation>,
    pub total_vendors: usize,
    pub cache_stats: CacheStats,
}

/// Rank candidates by cosine similarity to the problem statement and keep the best `top_k`.
pub fn shortlist(query: &[f32], candidates: Vec<Candidate>, top_k: usize) -> Vec<ShortlistEntry> {
    let mut entries: Vec<ShortlistEntry> = candidates
        .into_iter()
        .map(|c| ShortlistEntry {
            similarity: cosine_similarity(query, &c.embedding),
            name: c.name,
            capabilities: c.capabilities,
        })
        .collect();
    entries.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    entries.truncate(top_k);
    entries
}

pub fn evaluation_prompt(
    ps_analysis: &Value,
    batch: &[ShortlistEntry],
    criteria: &[Criterion],
) -> String {
    let vendors: Vec<&Value> = batch.iter().map(|e| &e.capabilities).collect();
    let vendors_json = serde_json::to_string_pretty(&vendors).unwrap_or_default();
    let ps_json = serde_json::to_string_pretty(ps_analysis).unwrap_or_default();
    let criteria_lines = criteria
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {} (0-100)", i + 1, c.label))
        .collect::<Vec<_>>()
        .join("\n");
    let score_fields = criteria
        .iter()
        .map(|c| format!("    \"{}\": <0-100>,", c.key))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are a senior technical evaluator selecting enterprise vendors.\n\n\
For each vendor, score every criterion from 0 (no alignment) to 100 (perfect match), \
give a short justification and list 3-5 strengths and concerns.\n\n\
PROBLEM STATEMENT:\n{ps_json}\n\n\
VENDORS TO EVALUATE:\n{vendors_json}\n\n\
CRITERIA:\n{criteria_lines}\n\n\
Respond with a JSON array only:\n\
[\n  {{\n    \"name\": \"<vendor name>\",\n{score_fields}\n    \
\"justification\": \"<3-5 sentences>\",\n    \
\"strengths\": [\"<point>\"],\n    \
\"concerns\": [\"<point>\"]\n  }}\n]"
    )
}

/// Turn one batch's LLM output into evaluations. A single object is accepted as a batch of one.
pub fn parse_batch(output: Value, criteria: &[Criterion]) -> Vec<VendorEvaluation> {
    let items = match output {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        _ => Vec::new(),
    };
    items
        .iter()
        .filter(|item| item.is_object())
        .map(|item| {
            let name = item
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or("Unknown")
                .to_string();
            score_item(item, name, criteria, WeightUnit::Fraction)
        })
        .collect()
}

/// Scores, composite, justification, strengths and concerns of one LLM evaluation object.
pub fn score_item(
    item: &Value,
    name: String,
    criteria: &[Criterion],
    unit: WeightUnit,
) -> VendorEvaluation {
    let by_key: BTreeMap<String, f64> = criteria
        .iter()
        .map(|c| (c.key.clone(), score_from_value(item.get(&c.key))))
        .collect();
    let scores = criteria
        .iter()
        .map(|c| (c.score_field(), by_key[&c.key]))
        .collect();
    VendorEvaluation {
        name,
        composite_score: composite_score(&by_key, criteria, unit),
        justification: item
            .get("justification")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string(),
        strengths: field_strings(item, "strengths"),
        concerns: field_strings(item, "concerns"),
        description: None,
        web_sources: Vec::new(),
        source: None,
        scores,
    }
}

pub fn fallback_evaluation(entry: &ShortlistEntry, criteria: &[Criterion]) -> VendorEvaluation {
    let similarity = entry.similarity * 100.0;
    VendorEvaluation {
        name: entry.name.clone(),
        composite_score: round_to(similarity * 0.8, 1),
        justification: FALLBACK_JUSTIFICATION.to_string(),
        strengths: vec!["Semantic similarity match detected".to_string()],
        concerns: vec!["LLM unavailable".to_string(), "Score is approximate".to_string()],
        description: None,
        web_sources: Vec::new(),
        source: None,
        scores: criteria
            .iter()
            .map(|c| (c.score_field(), round_to(similarity.clamp(0.0, 100.0), 1)))
            .collect(),
    }
}

async fn evaluate_batch(
    llm: &dyn ChatModel,
    ps_analysis: &Value,
    batch: &[ShortlistEntry],
    criteria: &[Criterion],
) -> Result<Vec<VendorEvaluation>, LlmError> {
    let raw = llm
        .complete(&evaluation_prompt(ps_analysis, batch, criteria))
        .await?;
    Ok(parse_batch(parse_json_output(&raw)?, criteria))
}

/// Score the shortlist in batches of `batch_size`, best composite first.
pub async fn evaluate_shortlist(
    llm: &dyn ChatModel,
    ps_analysis: &Value,
    shortlist: &[ShortlistEntry],
    batch_size: usize,
    criteria: &[Criterion],
) -> Vec<VendorEvaluation> {
    let mut results = Vec::with_capacity(shortlist.len());
    for (index, batch) in shortlist.chunks(batch_size.max(1)).enumerate() {
        info!(batch = index + 1, vendors = batch.len(), "evaluating batch");
        match evaluate_batch(llm, ps_analysis, batch, criteria).await {
            Ok(evaluations) => results.extend(evaluations),
            Err(e) => {
                warn!(batch = index + 1, error = %e, "batch evaluation failed, using similarity fallback");
                results.extend(batch.iter().map(|entry| fallback_evaluation(entry, criteria)));
            }
        }
    }
    results.sort_by(|a, b| b.composite_score.total_cmp(&a.composite_score));
    results
}

/// Analyse the problem statement and every stored vendor, shortlist, and score.
pub async fn run_vendor_matching(
    repo: &Arc<dyn Repository>,
    analyzer: &Analyzer,
    ps: &ProblemStatement,
    top_k: usize,
    batch_size: usize,
    criteria: &[Criterion],
) -> Result<MatchOutcome, AppError> {
    let vendors = repo.list_vendors().await?;
    if vendors.is_empty() {
        return Err(AppError::validation("No vendors available"));
    }

    let ps_processed = analyzer.problem_statement(ps).await?;

    let mut cache_stats = CacheStats::default();
    let mut candidates = Vec::with_capacity(vendors.len());
    for vendor in &vendors {
        match analyzer.vendor(vendor).await {
            Ok(processed) => {
                if processed.from_cache {
                    cache_stats.vendors_from_cache += 1;
                } else {
                    cache_stats.vendors_processed += 1;
                }
                candidates.push(Candidate {
                    name: vendor.name.clone(),
                    capabilities: processed.analysis,
                    embedding: processed.embedding,
                });
            }
            Err(e) => {
                error!(vendor = %vendor.name, error = %e, "vendor analysis failed, skipping");
            }
        }
    }
    info!(
        from_cache = cache_stats.vendors_from_cache,
        processed = cache_stats.vendors_processed,
        "vendor analyses ready"
    );

    let shortlisted = shortlist(&ps_processed.embedding, candidates, top_k);
    info!(shortlisted = shortlisted.len(), "vendors shortlisted");

    let results = evaluate_shortlist(
        analyzer.llm().as_ref(),
        &ps_processed.analysis,
        &shortlisted,
        batch_size,
        criteria,
    )
    .await;

    Ok(MatchOutcome {
        results,
        total_vendors: vendors.len(),
        cache_stats,
    })
}
