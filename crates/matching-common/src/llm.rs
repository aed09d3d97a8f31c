/// Provider-neutral seams over the LLM backends.
///
/// The server talks to [`ChatModel`], [`TextEmbedder`] and [`WebSearcher`] trait objects so the
/// matching pipeline does not care which provider answers, and tests can substitute
/// deterministic fakes.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::embedding::EmbedRole;
use crate::error::CommonError;
use crate::openai::{ChatCompletionRequest, EmbeddingRequest, LlmClient, LlmClientConfig, LlmError, Message};
use crate::provider::Provider;

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run a single-turn prompt and return the assistant text.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, text: &str, role: EmbedRole) -> Result<Vec<f32>, CommonError>;

    /// Model name reported by the health endpoint.
    fn model_name(&self) -> &str;
}

#[async_trait]
pub trait WebSearcher: Send + Sync {
    /// Run a tool-assisted web search and return the raw provider payload.
    async fn search(&self, prompt: &str) -> Result<Value, LlmError>;
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ChatCompletionRequest {
            model: self.config().model.clone(),
            messages: vec![Message::user(prompt)],
            temperature: Some(0.0),
            max_tokens: None,
        };
        let response = self.chat_completions(request, None).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::MissingContent("choices[0].message.content"))
    }
}

/// Embeddings served by an OpenAI-compatible `/embeddings` endpoint.
pub struct RemoteEmbedder {
    client: LlmClient,
    model: String,
}

impl RemoteEmbedder {
    pub fn new(client: LlmClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    /// OpenAI embeddings, model from `OPENAI_EMBED_MODEL` (default `text-embedding-3-small`).
    pub fn from_env() -> Result<Self, LlmError> {
        let client = LlmClient::new(LlmClientConfig::from_env(Provider::OpenAi))?;
        let model = std::env::var("OPENAI_EMBED_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        Ok(Self::new(client, model))
    }
}

#[async_trait]
impl TextEmbedder for RemoteEmbedder {
    async fn embed(&self, text: &str, _role: EmbedRole) -> Result<Vec<f32>, CommonError> {
        let response = self
            .client
            .embeddings(EmbeddingRequest {
                model: self.model.clone(),
                input: text.to_string(),
            })
            .await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| CommonError::Embedding("empty embedding result".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Web search through the OpenAI Responses API with the `web_search_preview` tool.
pub struct OpenAiWebSearch {
    client: LlmClient,
    model: String,
}

impl OpenAiWebSearch {
    pub fn new(client: LlmClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }

    pub fn from_env() -> Result<Self, LlmError> {
        let client = LlmClient::new(LlmClientConfig::from_env(Provider::OpenAi))?;
        let model = std::env::var("WEB_SEARCH_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        Ok(Self::new(client, model))
    }
}

#[async_trait]
impl WebSearcher for OpenAiWebSearch {
    async fn search(&self, prompt: &str) -> Result<Value, LlmError> {
        let request = json!({
            "model": self.model,
            "input": prompt,
            "tools": [{"type": "web_search_preview"}],
            "tool_choice": "auto",
            "temperature": 0,
        });
        self.client.responses(request).await
    }
}

/// Chat models keyed by provider.
#[derive(Clone, Default)]
pub struct LlmRegistry {
    models: HashMap<Provider, Arc<dyn ChatModel>>,
}

impl LlmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one OpenAI-compatible client per provider from the environment.
    pub fn from_env() -> Result<Self, LlmError> {
        let mut registry = Self::new();
        for provider in Provider::ALL {
            let config = LlmClientConfig::from_env(provider);
            info!(
                provider = %provider,
                base_url = %config.base_url,
                model = %config.model,
                has_key = config.api_key.is_some(),
                "llm provider configured"
            );
            registry = registry.with(provider, Arc::new(LlmClient::new(config)?));
        }
        Ok(registry)
    }

    pub fn with(mut self, provider: Provider, model: Arc<dyn ChatModel>) -> Self {
        self.models.insert(provider, model);
        self
    }

    pub fn get(&self, provider: Provider) -> Result<Arc<dyn ChatModel>, CommonError> {
        self.models
            .get(&provider)
            .cloned()
            .ok_or_else(|| CommonError::ProviderUnavailable(provider.to_string()))
    }
}

/// Parse JSON out of model output, tolerating markdown code fences and surrounding prose.
pub fn parse_json_output(raw: &str) -> Result<Value, LlmError> {
    let text = strip_code_fence(raw.trim());
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Ok(value);
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        if let (Some(start), Some(end)) = (text.find(open), text.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                    return Ok(value);
                }
            }
        }
    }

    let preview: String = text.chars().take(120).collect();
    Err(LlmError::UnparseableOutput(preview))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_start();
    rest.strip_suffix("```").unwrap_or(rest).trim_end()
}
