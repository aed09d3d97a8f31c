use std::str::FromStr;

use matching_common::provider::Provider;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    /// OpenAI `/embeddings`.
    OpenAi,
    /// fastembed, in process.
    Local,
}

/// Server configuration loaded from environment variables (after `.env`).
///
/// Optional:
/// - `BIND_ADDR` (default `0.0.0.0:5000`)
/// - `REDIS_URL`: selects the Redis repository; in-memory storage otherwise
/// - `MAX_FILE_SIZE` in bytes (default 16 MiB)
/// - `TOP_K_LIMIT` (100), `BATCH_SIZE_LIMIT` (20)
/// - `LLM_PROVIDER`: provider used when a request names none (default `openai`)
/// - `EMBEDDING_BACKEND`: `openai` or `local`
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub redis_url: Option<String>,
    pub max_file_size: usize,
    pub top_k_limit: i64,
    pub batch_size_limit: i64,
    pub default_provider: Provider,
    pub embedding_backend: EmbeddingBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".to_string(),
            redis_url: None,
            max_file_size: 16 * 1024 * 1024,
            top_k_limit: 100,
            batch_size_limit: 20,
            default_provider: Provider::OpenAi,
            embedding_backend: EmbeddingBackend::OpenAi,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let bind_addr = std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr);
        let redis_url = std::env::var("REDIS_URL")
            .ok()
            .filter(|u| !u.trim().is_empty());

        let max_file_size = parse_var("MAX_FILE_SIZE")?.unwrap_or(defaults.max_file_size);
        let top_k_limit = parse_var("TOP_K_LIMIT")?.unwrap_or(defaults.top_k_limit);
        let batch_size_limit = parse_var("BATCH_SIZE_LIMIT")?.unwrap_or(defaults.batch_size_limit);
        if top_k_limit < 1 || batch_size_limit < 1 {
            return Err(AppError::Config(
                "TOP_K_LIMIT and BATCH_SIZE_LIMIT must be at least 1".to_string(),
            ));
        }

        let default_provider = match std::env::var("LLM_PROVIDER") {
            Ok(value) => value
                .parse::<Provider>()
                .map_err(|e| AppError::Config(format!("LLM_PROVIDER: {e}")))?,
            Err(_) => defaults.default_provider,
        };

        let embedding_backend = match std::env::var("EMBEDDING_BACKEND") {
            Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
                "openai" => EmbeddingBackend::OpenAi,
                "local" => EmbeddingBackend::Local,
                other => {
                    return Err(AppError::Config(format!(
                        "EMBEDDING_BACKEND must be 'openai' or 'local', got '{other}'"
                    )))
                }
            },
            Err(_) => defaults.embedding_backend,
        };

        Ok(Self {
            bind_addr,
            redis_url,
            max_file_size,
            top_k_limit,
            batch_size_limit,
            default_provider,
            embedding_backend,
        })
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, AppError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::Config(format!("{name} must be a number, got '{raw}'"))),
        Err(_) => Ok(None),
    }
}
