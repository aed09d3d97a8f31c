mod analysis;
mod config;
mod documents;
mod error;
mod export;
mod handlers;
mod matching;
mod model;
mod search;
mod state;
mod store;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use matching_common::embedding::LocalEmbedder;
use matching_common::llm::{LlmRegistry, OpenAiWebSearch, RemoteEmbedder, TextEmbedder};

use config::{Config, EmbeddingBackend};
use state::AppState;
use store::{MemoryRepository, RedisRepository, Repository};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting vendor matching server");

    let config = Config::from_env()?;
    info!(
        bind_addr = %config.bind_addr,
        default_provider = %config.default_provider,
        max_file_size = config.max_file_size,
        embedding_backend = ?config.embedding_backend,
        "configuration loaded"
    );

    let repo: Arc<dyn Repository> = match config.redis_url.as_deref() {
        Some(url) => Arc::new(RedisRepository::connect(url).await?),
        None => {
            info!("REDIS_URL not set, using in-memory storage");
            Arc::new(MemoryRepository::new())
        }
    };

    let llms = LlmRegistry::from_env()?;
    let embedder: Arc<dyn TextEmbedder> = match config.embedding_backend {
        EmbeddingBackend::OpenAi => Arc::new(RemoteEmbedder::from_env()?),
        EmbeddingBackend::Local => {
            info!("loading local embedding model");
            Arc::new(LocalEmbedder::new().await?)
        }
    };
    info!(model = embedder.model_name(), "embedder ready");
    let searcher = Arc::new(OpenAiWebSearch::from_env()?);

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState {
        config,
        repo,
        llms,
        embedder,
        searcher,
    });
    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("shutdown signal received");
        })
        .await?;

    info!("server shut down");
    Ok(())
}
