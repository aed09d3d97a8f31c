use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use matching_common::api::ErrorBody;
use matching_common::criteria::CriteriaError;
use matching_common::error::CommonError;
use matching_common::openai::LlmError;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Criteria(#[from] CriteriaError),

    #[error("{0}")]
    NotFound(String),

    #[error("web search failed: {details}")]
    WebSearch { details: String },

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_)
            | AppError::Criteria(_)
            | AppError::Common(CommonError::UnknownProvider(_))
            | AppError::Common(CommonError::ProviderUnavailable(_)) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::WebSearch { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::WebSearch { details } => {
                tracing::error!(details = %details, "web search failed");
                ErrorBody {
                    error: "Web search failed".to_string(),
                    details: Some(details.clone()),
                }
            }
            _ if status.is_server_error() => {
                tracing::error!(error = %self, "request failed");
                ErrorBody {
                    error: "internal server error".to_string(),
                    details: None,
                }
            }
            _ => {
                tracing::warn!(error = %self, status = status.as_u16(), "request rejected");
                ErrorBody {
                    error: self.to_string(),
                    details: None,
                }
            }
        };
        (status, Json(body)).into_response()
    }
}
