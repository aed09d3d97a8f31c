mod health;
mod matching;
mod problem_statements;
mod vendors;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use matching_common::provider::Provider;

use crate::state::AppState;

/// Multipart overhead allowed on top of the configured upload size.
const MULTIPART_SLACK_BYTES: usize = 1024 * 1024;

/// `?llm_provider=` on read-only routes; unknown values fall back to OpenAI.
#[derive(Debug, Default, Deserialize)]
pub struct ProviderQuery {
    pub llm_provider: Option<String>,
}

impl ProviderQuery {
    pub fn provider(&self) -> Provider {
        Provider::parse_or_default(self.llm_provider.as_deref())
    }

    /// Like [`ProviderQuery::provider`], but missing or unknown values resolve to `fallback`.
    pub fn provider_or(&self, fallback: Provider) -> Provider {
        self.llm_provider
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(fallback)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = state.config.max_file_size + MULTIPART_SLACK_BYTES;

    Router::new()
        .route("/api/health", get(health::health))
        .route("/api/dashboard", get(health::dashboard))
        .route("/api/clear_cache", post(health::clear_cache))
        .route("/api/ps_submission", post(problem_statements::submit))
        .route("/api/problem_statements", get(problem_statements::list))
        .route(
            "/api/problem_statements/{id}",
            get(problem_statements::detail).delete(problem_statements::delete),
        )
        .route("/api/vendor_submission", post(vendors::submit))
        .route("/api/vendors", get(vendors::list))
        .route(
            "/api/vendors/{name}",
            get(vendors::detail).delete(vendors::delete),
        )
        .route("/api/vendor_matching", post(matching::vendor_matching))
        .route("/api/web_search_vendors", post(matching::web_search_vendors))
        .route("/api/download_results/{ps_id}", get(matching::download_results))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
