use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("Scrape already in progress for source {0}")]
    AlreadyRunning(Uuid),

    #[error("No active scrape for source {0}")]
    NoActiveScrape(Uuid),

    #[error("Fetch error: {0}")]
    Fetch(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::UnsupportedPlatform(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::AlreadyRunning(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::NoActiveScrape(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::Fetch(msg) => {
                tracing::error!("Fetch error: {msg}");
                (StatusCode::BAD_GATEWAY, "Upstream fetch failed".to_string())
            }
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = axum::Json(json!({ "error": message }));
        (status, body).into_response()
    }
}
