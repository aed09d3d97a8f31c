/// Error types shared across the vendor matching crates.
///
/// These errors represent failures in infrastructure components (LLM providers, embeddings)
/// that both the server and the client can hit. Application-specific errors are defined in
/// each crate and wrap `CommonError` via `#[from]`.
use crate::openai::LlmError;

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("invalid LLM provider '{0}'. Use: openai, gemini, or ollama")]
    UnknownProvider(String),

    #[error("no client configured for provider {0}")]
    ProviderUnavailable(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error(transparent)]
    Llm(#[from] LlmError),
}
