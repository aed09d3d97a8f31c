use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use matching_common::provider::Provider;

use super::{Repository, StoreError};
use crate::model::{EntityKind, ProblemStatement, Vendor};

type AnalysisKey = (EntityKind, Provider, String);
type EmbeddingKey = (EntityKind, String);

#[derive(Default)]
struct Tables {
    problem_statements: HashMap<String, ProblemStatement>,
    vendors: HashMap<String, Vendor>,
    analyses: HashMap<AnalysisKey, Value>,
    embeddings: HashMap<EmbeddingKey, Vec<f32>>,
}

/// Process-local storage. Everything is lost on restart.
#[derive(Default)]
pub struct MemoryRepository {
    tables: RwLock<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn put_problem_statement(&self, ps: &ProblemStatement) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .problem_statements
            .insert(ps.id.clone(), ps.clone());
        Ok(())
    }

    async fn get_problem_statement(&self, id: &str) -> Result<Option<ProblemStatement>, StoreError> {
        Ok(self.tables.read().await.problem_statements.get(id).cloned())
    }

    async fn list_problem_statements(&self) -> Result<Vec<ProblemStatement>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .problem_statements
            .values()
            .cloned()
            .collect())
    }

    async fn delete_problem_statement(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .tables
            .write()
            .await
            .problem_statements
            .remove(id)
            .is_some())
    }

    async fn put_vendor(&self, vendor: &Vendor) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .vendors
            .insert(vendor.name.clone(), vendor.clone());
        Ok(())
    }

    async fn get_vendor(&self, name: &str) -> Result<Option<Vendor>, StoreError> {
        Ok(self.tables.read().await.vendors.get(name).cloned())
    }

    async fn list_vendors(&self) -> Result<Vec<Vendor>, StoreError> {
        Ok(self.tables.read().await.vendors.values().cloned().collect())
    }

    async fn delete_vendor(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.vendors.remove(name).is_some())
    }

    async fn get_analysis(
        &self,
        kind: EntityKind,
        provider: Provider,
        hash: &str,
    ) -> Result<Option<Value>, StoreError> {
        let key = (kind, provider, hash.to_string());
        Ok(self.tables.read().await.analyses.get(&key).cloned())
    }

    async fn put_analysis(
        &self,
        kind: EntityKind,
        provider: Provider,
        hash: &str,
        analysis: &Value,
    ) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .analyses
            .insert((kind, provider, hash.to_string()), analysis.clone());
        Ok(())
    }

    async fn delete_analysis(
        &self,
        kind: EntityKind,
        provider: Provider,
        hash: &str,
    ) -> Result<bool, StoreError> {
        let key = (kind, provider, hash.to_string());
        Ok(self.tables.write().await.analyses.remove(&key).is_some())
    }

    async fn count_analyses(&self) -> Result<usize, StoreError> {
        Ok(self.tables.read().await.analyses.len())
    }

    async fn clear_analyses(&self) -> Result<usize, StoreError> {
        let mut tables = self.tables.write().await;
        let removed = tables.analyses.len();
        tables.analyses.clear();
        Ok(removed)
    }

    async fn get_embedding(
        &self,
        kind: EntityKind,
        hash: &str,
    ) -> Result<Option<Vec<f32>>, StoreError> {
        let key = (kind, hash.to_string());
        Ok(self.tables.read().await.embeddings.get(&key).cloned())
    }

    async fn put_embedding(
        &self,
        kind: EntityKind,
        hash: &str,
        embedding: &[f32],
    ) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .embeddings
            .insert((kind, hash.to_string()), embedding.to_vec());
        Ok(())
    }

    async fn delete_embedding(&self, kind: EntityKind, hash: &str) -> Result<bool, StoreError> {
        let key = (kind, hash.to_string());
        Ok(self.tables.write().await.embeddings.remove(&key).is_some())
    }
}
