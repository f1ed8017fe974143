//! Crate-wide error taxonomy.
//!
//! Every failure crossing a component boundary is classified into one of
//! these variants first; nothing escapes unclassified. The mapping to HTTP
//! status codes and machine-readable codes lives here so handlers stay thin.

use crate::database::error::DatabaseError;
use crate::gateway::GatewayError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error codes for client handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "VALIDATION_ERROR")]
    Validation,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "AUTHENTICATION_ERROR")]
    Authentication,
    #[serde(rename = "GATEWAY_ERROR")]
    Gateway,
    #[serde(rename = "CONFIGURATION_ERROR")]
    Configuration,
    #[serde(rename = "DATABASE_ERROR")]
    Database,
}

#[derive(Debug, Error)]
pub enum AppError {
    /// Bad amount, malformed identifier, missing field. Returned as 4xx, no
    /// retry.
    #[error("validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },

    /// Payment locked, already processed, or in a terminal state.
    #[error("{0}")]
    Conflict(String),

    /// Webhook signature failure. The only cause for a non-2xx webhook
    /// response.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// External API failure, wrapping the provider-supplied detail. The
    /// caller decides whether to retry; the idempotency short-circuit makes
    /// retries safe.
    #[error("gateway error: {message}")]
    Gateway { message: String, retryable: bool },

    /// Missing idempotency key or similarly broken setup. Fatal, never
    /// retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl AppError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &str, id: impl std::fmt::Display) -> Self {
        AppError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Conflict(_) => 409,
            AppError::Authentication(_) => 401,
            AppError::Gateway { .. } => 502,
            AppError::Configuration(_) => 500,
            AppError::Database(_) => 500,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::Validation,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::Authentication(_) => ErrorCode::Authentication,
            AppError::Gateway { .. } => ErrorCode::Gateway,
            AppError::Configuration(_) => ErrorCode::Configuration,
            AppError::Database(_) => ErrorCode::Database,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Gateway { retryable, .. } => *retryable,
            AppError::Database(err) => err.is_retryable(),
            _ => false,
        }
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        let retryable = err.is_retryable();
        AppError::Gateway {
            message: err.to_string(),
            retryable,
        }
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;
