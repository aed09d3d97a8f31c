/// Persistence for problem statements, vendors, cached analyses and embeddings.
///
/// Analyses are stored per (kind, provider, content hash) so each provider keeps its own
/// reading of the same document. Embeddings are keyed by (kind, content hash) only and shared
/// across providers.
mod memory;
mod redis;

use async_trait::async_trait;
use serde_json::Value;

use matching_common::provider::Provider;

use crate::model::{EntityKind, ProblemStatement, Vendor};

pub use self::memory::MemoryRepository;
pub use self::redis::RedisRepository;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("stored value is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait Repository: Send + Sync {
    /// Round-trip to the backing store.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn put_problem_statement(&self, ps: &ProblemStatement) -> Result<(), StoreError>;
    async fn get_problem_statement(&self, id: &str) -> Result<Option<ProblemStatement>, StoreError>;
    /// Unordered.
    async fn list_problem_statements(&self) -> Result<Vec<ProblemStatement>, StoreError>;
    async fn delete_problem_statement(&self, id: &str) -> Result<bool, StoreError>;

    async fn put_vendor(&self, vendor: &Vendor) -> Result<(), StoreError>;
    async fn get_vendor(&self, name: &str) -> Result<Option<Vendor>, StoreError>;
    /// Unordered.
    async fn list_vendors(&self) -> Result<Vec<Vendor>, StoreError>;
    async fn delete_vendor(&self, name: &str) -> Result<bool, StoreError>;

    async fn get_analysis(
        &self,
        kind: EntityKind,
        provider: Provider,
        hash: &str,
    ) -> Result<Option<Value>, StoreError>;
    async fn put_analysis(
        &self,
        kind: EntityKind,
        provider: Provider,
        hash: &str,
        analysis: &Value,
    ) -> Result<(), StoreError>;
    async fn delete_analysis(
        &self,
        kind: EntityKind,
        provider: Provider,
        hash: &str,
    ) -> Result<bool, StoreError>;
    async fn count_analyses(&self) -> Result<usize, StoreError>;
    /// Drops every cached analysis and returns how many were removed.
    async fn clear_analyses(&self) -> Result<usize, StoreError>;

    async fn get_embedding(&self, kind: EntityKind, hash: &str)
        -> Result<Option<Vec<f32>>, StoreError>;
    async fn put_embedding(
        &self,
        kind: EntityKind,
        hash: &str,
        embedding: &[f32],
    ) -> Result<(), StoreError>;
    async fn delete_embedding(&self, kind: EntityKind, hash: &str) -> Result<bool, StoreError>;
}
