//! Error handling module
//!
//! Provides unified error types for the diagnostic engine and its HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::error;

/// Which side of a performance comparison a query ran on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Reference,
    Candidate,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Reference => write!(f, "reference"),
            Side::Candidate => write!(f, "candidate"),
        }
    }
}

/// Failure reported by a database session.
///
/// Sessions stay context-free; callers wrap this into the `AppError`
/// variant that matches what they were doing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct DbError {
    pub message: String,
}

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<tokio_postgres::Error> for DbError {
    fn from(e: tokio_postgres::Error) -> Self {
        // The top-level message of a server error is just "db error"
        match e.as_db_error() {
            Some(db) => Self::new(format!("{}: {}", db.code().code(), db.message())),
            None => Self::new(e.to_string()),
        }
    }
}

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Liveness probe failed: {0}")]
    ProbeFailure(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Introspection failed: {0}")]
    Introspection(String),

    #[error("Quality scan failed on table '{table}': {message}")]
    QualityScan { table: String, message: String },

    #[error("Query '{query}' failed on {side}: {message}")]
    QueryExecution {
        query: String,
        side: Side,
        message: String,
    },

    #[error("Branch directory error: {0}")]
    Directory(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl AppError {
    /// Stable machine-readable code for the error kind
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::ProbeFailure(_) => "PROBE_FAILURE",
            AppError::Credential(_) => "CREDENTIAL_ERROR",
            AppError::Introspection(_) => "INTROSPECTION_ERROR",
            AppError::QualityScan { .. } => "QUALITY_SCAN_ERROR",
            AppError::QueryExecution { .. } => "QUERY_EXECUTION_ERROR",
            AppError::Directory(_) => "DIRECTORY_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Connection(_) | AppError::ProbeFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Credential(_) | AppError::Directory(_) => StatusCode::BAD_GATEWAY,
            AppError::Introspection(_)
            | AppError::QualityScan { .. }
            | AppError::QueryExecution { .. }
            | AppError::Internal(_)
            | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let (message, details) = match &self {
            AppError::Validation(msg) | AppError::BadRequest(msg) | AppError::NotFound(msg) => {
                (msg.clone(), None)
            }
            AppError::Internal(msg) | AppError::Config(msg) => {
                error!(code, "{}", msg);
                ("An internal error occurred".to_string(), Some(msg.clone()))
            }
            other => {
                error!(code, "{}", other);
                (other.to_string(), None)
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}
