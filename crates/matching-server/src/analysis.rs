/// LLM analysis and embedding of problem statements and vendor profiles, cached in the
/// repository.
///
/// The analysis is provider-specific and cached under (kind, provider, content hash). The
/// embedding is computed from the analysis' text representation, cached under (kind, content
/// hash), and reused by every provider.
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::info;

use matching_common::llm::{parse_json_output, ChatModel, TextEmbedder};
use matching_common::provider::Provider;

use crate::error::AppError;
use crate::model::{EntityKind, ProblemStatement, Vendor};
use crate::store::Repository;

/// Fields the server adds to an analysis; skipped in previews and embeddings.
pub const METADATA_FIELDS: [&str; 3] = ["name", "llm_provider", "_hash"];

#[derive(Debug, Clone)]
pub struct Processed {
    pub analysis: Value,
    pub embedding: Vec<f32>,
    /// Both the analysis and the embedding came from the repository.
    pub from_cache: bool,
}

pub struct Analyzer {
    repo: Arc<dyn Repository>,
    llm: Arc<dyn ChatModel>,
    embedder: Arc<dyn TextEmbedder>,
    provider: Provider,
}

impl Analyzer {
    pub fn new(
        repo: Arc<dyn Repository>,
        llm: Arc<dyn ChatModel>,
        embedder: Arc<dyn TextEmbedder>,
        provider: Provider,
    ) -> Self {
        Self {
            repo,
            llm,
            embedder,
            provider,
        }
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn llm(&self) -> &Arc<dyn ChatModel> {
        &self.llm
    }

    pub async fn problem_statement(&self, ps: &ProblemStatement) -> Result<Processed, AppError> {
        let hash = ps.content_hash();
        let prompt = problem_statement_prompt(&ps.full_statement);
        let mut metadata = Map::new();
        metadata.insert("llm_provider".into(), json!(self.provider));
        metadata.insert("_hash".into(), json!(hash));
        self.process(EntityKind::ProblemStatement, &hash, &prompt, metadata, &ps.id)
            .await
    }

    pub async fn vendor(&self, vendor: &Vendor) -> Result<Processed, AppError> {
        let hash = vendor.content_hash();
        let prompt = vendor_prompt(&vendor.text);
        let mut metadata = Map::new();
        metadata.insert("name".into(), json!(vendor.name));
        metadata.insert("llm_provider".into(), json!(self.provider));
        self.process(EntityKind::Vendor, &hash, &prompt, metadata, &vendor.name)
            .await
    }

    async fn process(
        &self,
        kind: EntityKind,
        hash: &str,
        prompt: &str,
        metadata: Map<String, Value>,
        label: &str,
    ) -> Result<Processed, AppError> {
        let cached = self.repo.get_analysis(kind, self.provider, hash).await?;
        let analysis_cached = cached.is_some();
        let analysis = match cached {
            Some(analysis) => analysis,
            None => {
                info!(kind = kind.as_str(), entity = label, provider = %self.provider, "analyzing");
                let raw = self.llm.complete(prompt).await?;
                let analysis = with_metadata(parse_json_output(&raw)?, metadata);
                self.repo
                    .put_analysis(kind, self.provider, hash, &analysis)
                    .await?;
                analysis
            }
        };

        let cached = self.repo.get_embedding(kind, hash).await?;
        let embedding_cached = cached.is_some();
        let embedding = match cached {
            Some(embedding) => embedding,
            None => {
                info!(kind = kind.as_str(), entity = label, "embedding");
                let embedding = self
                    .embedder
                    .embed(&text_representation(&analysis), kind.embed_role())
                    .await?;
                self.repo.put_embedding(kind, hash, &embedding).await?;
                embedding
            }
        };

        Ok(Processed {
            analysis,
            embedding,
            from_cache: analysis_cached && embedding_cached,
        })
    }
}

fn with_metadata(parsed: Value, metadata: Map<String, Value>) -> Value {
    let mut object = match parsed {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("analysis".into(), other);
            map
        }
    };
    object.extend(metadata);
    Value::Object(object)
}

/// `key: value` pairs joined by spaces, with lists and maps JSON-encoded.
pub fn text_representation(analysis: &Value) -> String {
    let Some(map) = analysis.as_object() else {
        return analysis.to_string();
    };
    map.iter()
        .filter(|(key, _)| !METADATA_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| match value {
            Value::String(s) => format!("{key}: {s}"),
            other => format!("{key}: {other}"),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The first two non-metadata fields of an analysis.
pub fn analysis_preview(analysis: &Value) -> Option<Value> {
    let map = analysis.as_object()?;
    let preview: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| !METADATA_FIELDS.contains(&key.as_str()))
        .take(2)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Some(Value::Object(preview))
}

pub fn problem_statement_prompt(full_statement: &str) -> String {
    format!(
        "Analyze this problem statement and extract:\n\
1. Primary technical domains (e.g., NLP, CV, ML)\n\
2. Required tools or frameworks\n\
3. Key technical requirements (e.g., real-time, accuracy)\n\
4. Deployment constraints (e.g., cloud, edge)\n\
5. Project complexity (e.g., research, production)\n\n\
Problem Statement: {full_statement}\n\n\
Respond with a single JSON object using the keys \"primary_technical_domains\", \
\"required_tools_or_frameworks\", \"key_technical_requirements\", \
\"deployment_constraints\" and \"project_complexity\"."
    )
}

pub fn vendor_prompt(text: &str) -> String {
    format!(
        "From this vendor profile, extract:\n\
1. Key technical domains (e.g., NLP, CV, ML)\n\
2. Tools and frameworks used\n\
3. Core capabilities (e.g., scalability, real-time processing)\n\
4. Industry experience\n\
5. Team size and project scale\n\n\
Vendor Profile: {text}\n\n\
Respond with a single JSON object using the keys \"technical_domains\", \
\"tools_and_frameworks\", \"core_capabilities\", \"industry_experience\" and \
\"team_size_and_project_scale\"."
    )
}
