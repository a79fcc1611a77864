use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Chain RPC unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("Insufficient balance: available={available}, requested={requested}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Stake has not matured yet")]
    NotMatured,

    #[error("Signature does not match the claimed address")]
    InvalidSignature,

    #[error("Challenge has expired")]
    ChallengeExpired,

    #[error("No matching challenge for this address and nonce")]
    ChallengeNotFound,

    #[error("Wallet is already linked")]
    AlreadyLinked,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Stable machine-readable kind, independent of the human message.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::Conflict(_) => "conflict",
            ApiError::NotFound(_) => "not_found",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::ExternalUnavailable(_) => "external_unavailable",
            ApiError::InsufficientBalance { .. } => "insufficient_balance",
            ApiError::NotMatured => "not_matured",
            ApiError::InvalidSignature => "invalid_signature",
            ApiError::ChallengeExpired => "challenge_expired",
            ApiError::ChallengeNotFound => "challenge_not_found",
            ApiError::AlreadyLinked => "already_linked",
            ApiError::Database(_) => "database_error",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_)
            | ApiError::InsufficientBalance { .. }
            | ApiError::NotMatured
            | ApiError::InvalidSignature
            | ApiError::ChallengeExpired => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) | ApiError::ChallengeNotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::AlreadyLinked => StatusCode::CONFLICT,
            ApiError::ExternalUnavailable(_) => StatusCode::BAD_GATEWAY,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        match &self {
            ApiError::Database(e) => tracing::error!("Database error: {}", e),
            ApiError::Internal(e) => tracing::error!("Internal error: {}", e),
            ApiError::ExternalUnavailable(e) => tracing::error!("Chain RPC error: {}", e),
            _ => tracing::warn!("Request failed: {}", self),
        }

        let body = Json(json!({
            "error": self.kind(),
            "details": self.to_string(),
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        ApiError::Database(error.to_string())
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(error: reqwest::Error) -> Self {
        ApiError::ExternalUnavailable(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
