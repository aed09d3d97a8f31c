use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tracing::{error, info};

use matching_common::api::{Dashboard, Health, MessageResponse};

use crate::error::AppError;
use crate::model::sort_newest_first;
use crate::state::AppState;

const RECENT: usize = 3;

pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Health>) {
    match state.repo.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(Health {
                status: "healthy".to_string(),
                database: "connected".to_string(),
                embedding_model: Some(state.embedder.model_name().to_string()),
                error: None,
            }),
        ),
        Err(e) => {
            error!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Health {
                    status: "unhealthy".to_string(),
                    database: "disconnected".to_string(),
                    embedding_model: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn dashboard(State(state): State<Arc<AppState>>) -> Result<Json<Dashboard>, AppError> {
    let mut vendors = state.repo.list_vendors().await?;
    let mut statements = state.repo.list_problem_statements().await?;
    sort_newest_first(&mut vendors, |v| v.created_at);
    sort_newest_first(&mut statements, |ps| ps.created_at);

    Ok(Json(Dashboard {
        total_vendors: vendors.len(),
        total_ps: statements.len(),
        cached_analyses: state.repo.count_analyses().await?,
        recent_vendors: vendors.iter().take(RECENT).map(|v| v.name.clone()).collect(),
        recent_ps: statements.iter().take(RECENT).map(|ps| ps.title.clone()).collect(),
    }))
}

pub async fn clear_cache(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MessageResponse>, AppError> {
    let removed = state.repo.clear_analyses().await?;
    info!(removed, "analysis cache cleared");
    Ok(Json(MessageResponse {
        message: "Cache cleared successfully".to_string(),
    }))
}
