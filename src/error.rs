use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Quota exceeded")]
    QuotaExceeded,

    #[error("Name conflict: {0}")]
    NameConflict(String),

    #[error("Cannot move a folder into itself or its descendant")]
    CyclicMove,

    #[error("Share has expired")]
    Expired,

    #[error("Download limit reached")]
    LimitReached,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

impl AppError {
    /// True for transient failures a queue consumer should retry. Database
    /// errors count: SQLite contention clears on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Upstream(_) | AppError::Request(_) | AppError::Database(_)
        )
    }
}

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn success_message(message: &str) -> ApiResponse<()> {
        ApiResponse {
            code: 0,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn error(code: i32, message: &str) -> ApiResponse<()> {
        ApiResponse {
            code,
            message: message.to_string(),
            data: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Codes are distinct per error family so clients can render
        // specific guidance (quota vs name clash vs cycle).
        let (status, code, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, "Database error".to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, 404, msg.clone()),
            AppError::QuotaExceeded => (StatusCode::PAYLOAD_TOO_LARGE, 413, self.to_string()),
            AppError::NameConflict(msg) => (StatusCode::CONFLICT, 409, msg.clone()),
            AppError::CyclicMove => (StatusCode::UNPROCESSABLE_ENTITY, 422, self.to_string()),
            AppError::Expired => (StatusCode::GONE, 410, self.to_string()),
            AppError::LimitReached => (StatusCode::TOO_MANY_REQUESTS, 429, self.to_string()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, 401, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, 400, msg.clone()),
            AppError::Upstream(msg) => {
                tracing::warn!("Upstream unavailable: {}", msg);
                (StatusCode::BAD_GATEWAY, 502, msg.clone())
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 500, msg.clone())
            }
            AppError::Jwt(e) => {
                tracing::warn!("JWT error: {:?}", e);
                (StatusCode::UNAUTHORIZED, 401, "Invalid token".to_string())
            }
            AppError::Request(e) => {
                tracing::warn!("Request error: {:?}", e);
                (StatusCode::BAD_GATEWAY, 502, "External request error".to_string())
            }
        };

        let body = Json(ApiResponse::<()>::error(code, &message));
        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
