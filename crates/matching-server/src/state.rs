use std::sync::Arc;

use matching_common::llm::{LlmRegistry, TextEmbedder, WebSearcher};
use matching_common::provider::Provider;

use crate::analysis::Analyzer;
use crate::config::Config;
use crate::error::AppError;
use crate::store::Repository;

pub struct AppState {
    pub config: Config,
    pub repo: Arc<dyn Repository>,
    pub llms: LlmRegistry,
    pub embedder: Arc<dyn TextEmbedder>,
    pub searcher: Arc<dyn WebSearcher>,
}

impl AppState {
    pub fn analyzer(&self, provider: Provider) -> Result<Analyzer, AppError> {
        Ok(Analyzer::new(
            Arc::clone(&self.repo),
            self.llms.get(provider)?,
            Arc::clone(&self.embedder),
            provider,
        ))
    }

    /// Provider named in a request body: absent means the configured default, unknown is a
    /// validation error.
    pub fn body_provider(&self, requested: Option<&str>) -> Result<Provider, AppError> {
        self.body_provider_or(requested, self.config.default_provider)
    }

    pub fn body_provider_or(
        &self,
        requested: Option<&str>,
        default: Provider,
    ) -> Result<Provider, AppError> {
        match requested.map(str::trim).filter(|p| !p.is_empty()) {
            Some(name) => Ok(name.parse::<Provider>()?),
            None => Ok(default),
        }
    }
}
