//! Application error types for robust error handling.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scylla::transport::errors::{NewSessionError, QueryError};
use serde_json::json;
use thiserror::Error;

/// Application-level errors.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Cassandra query error: {0}")]
    Cql(#[from] QueryError),

    #[error("Cassandra session error: {0}")]
    CqlSession(#[from] NewSessionError),

    #[error("Cassandra row error: {0}")]
    CqlRows(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("Invalid snowflake: {0}")]
    InvalidSnowflake(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True for transport failures of any presence backend (connection, timeout, protocol).
    /// These are surfaced to the caller and never retried inside the core.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            AppError::Redis(_)
                | AppError::Db(_)
                | AppError::Cql(_)
                | AppError::CqlSession(_)
                | AppError::CqlRows(_)
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            e if e.is_backend_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InvalidIdentity(_) | AppError::InvalidSnowflake(_) => StatusCode::BAD_REQUEST,
            AppError::Serialization(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
