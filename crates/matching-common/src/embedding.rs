/// Local embeddings through fastembed, plus vector similarity.
///
/// `TextEmbedding` is synchronous and CPU-bound, so every call runs on a blocking thread.
/// nomic-embed-text-v1.5 expects task-prefixed inputs: problem statements are embedded as
/// queries ("search_query: ") and vendor profiles as documents ("search_document: ").
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CommonError;
use crate::llm::TextEmbedder;

/// Which side of the similarity search a text sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbedRole {
    Query,
    Document,
}

impl EmbedRole {
    fn prefix(self) -> &'static str {
        match self {
            EmbedRole::Query => "search_query: ",
            EmbedRole::Document => "search_document: ",
        }
    }
}

pub struct LocalEmbedder {
    model: Arc<fastembed::TextEmbedding>,
}

impl LocalEmbedder {
    /// Load nomic-embed-text-v1.5, downloading it on first run.
    pub async fn new() -> Result<Self, CommonError> {
        let model = tokio::task::spawn_blocking(|| {
            let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::NomicEmbedTextV15)
                .with_show_download_progress(false);
            fastembed::TextEmbedding::try_new(options)
        })
        .await
        .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
        .map_err(|e| CommonError::Embedding(format!("model initialization failed: {e}")))?;

        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl TextEmbedder for LocalEmbedder {
    async fn embed(&self, text: &str, role: EmbedRole) -> Result<Vec<f32>, CommonError> {
        let input = vec![format!("{}{text}", role.prefix())];
        let model = Arc::clone(&self.model);
        let mut results = tokio::task::spawn_blocking(move || model.embed(input, None))
            .await
            .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
            .map_err(|e| CommonError::Embedding(format!("embedding failed: {e}")))?;
        results
            .pop()
            .ok_or_else(|| CommonError::Embedding("empty embedding result".to_string()))
    }

    fn model_name(&self) -> &str {
        "nomic-embed-text-v1.5"
    }
}

/// Cosine similarity of two vectors. Zero when either is empty, all zeros, or the
/// dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
