//! Error types for Recall services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - Transient/terminal classification driving the retry policy
//! - HTTP status code mapping
//! - Structured error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    InvalidFormat,
    PayloadTooLarge,

    // Resource errors (4xxx)
    NotFound,
    SourceNotFound,
    ItemNotFound,
    JobNotFound,

    // Conflict errors (5xxx)
    DuplicateItem,

    // Transient I/O (6xxx)
    TransientIo,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External provider errors (8xxx)
    ProviderUnavailable,
    EmbeddingError,
    ExtractionError,
    WebSearchError,
    UpstreamError,

    // Content errors (85xx)
    MalformedContent,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,
            ErrorCode::PayloadTooLarge => 1004,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::SourceNotFound => 4002,
            ErrorCode::ItemNotFound => 4003,
            ErrorCode::JobNotFound => 4004,

            // Conflicts (5xxx)
            ErrorCode::DuplicateItem => 5001,

            // Transient (6xxx)
            ErrorCode::TransientIo => 6001,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // External (8xxx)
            ErrorCode::ProviderUnavailable => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::ExtractionError => 8003,
            ErrorCode::WebSearchError => 8004,
            ErrorCode::UpstreamError => 8005,
            ErrorCode::MalformedContent => 8501,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Source not found: {id}")]
    SourceNotFound { id: String },

    #[error("Content item not found: {id}")]
    ItemNotFound { id: String },

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    /// The identity key has already been processed for this source.
    /// Callers treat this as "already known", not as a failure.
    #[error("Duplicate content item: source {source_id}, identity key {identity_key}")]
    DuplicateItem {
        source_id: Uuid,
        identity_key: String,
    },

    // Transient I/O: network failures, timeouts, rate limits
    #[error("Transient I/O failure: {message}")]
    TransientIo { message: String },

    // Content that can never be processed (terminal for its item)
    #[error("Malformed content: {message}")]
    MalformedContent { message: String },

    // An external provider is down; degrade, don't crash
    #[error("Provider unavailable: {provider}: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Extraction service error: {message}")]
    ExtractionError { message: String },

    #[error("Web search error: {message}")]
    WebSearchError { message: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::SourceNotFound { .. } => ErrorCode::SourceNotFound,
            AppError::ItemNotFound { .. } => ErrorCode::ItemNotFound,
            AppError::JobNotFound { .. } => ErrorCode::JobNotFound,
            AppError::DuplicateItem { .. } => ErrorCode::DuplicateItem,
            AppError::TransientIo { .. } => ErrorCode::TransientIo,
            AppError::MalformedContent { .. } => ErrorCode::MalformedContent,
            AppError::ProviderUnavailable { .. } => ErrorCode::ProviderUnavailable,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::ExtractionError { .. } => ErrorCode::ExtractionError,
            AppError::WebSearchError { .. } => ErrorCode::WebSearchError,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether a retry with backoff may succeed.
    ///
    /// Drives the ingestion job state machine: transient failures re-queue up
    /// to the attempt cap, everything else is terminal for the item.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::TransientIo { .. }
            | AppError::ProviderUnavailable { .. }
            | AppError::DatabaseConnection { .. } => true,
            AppError::HttpClient(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Classify an HTTP response status from an external provider.
    ///
    /// Rate limits and server-side failures are retryable; other client
    /// errors are not.
    pub fn from_provider_status(provider: &str, status: StatusCode, body: String) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            AppError::TransientIo {
                message: format!("{} returned {}: {}", provider, status, body),
            }
        } else {
            AppError::MalformedContent {
                message: format!("{} rejected request with {}: {}", provider, status, body),
            }
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. } => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::SourceNotFound { .. }
            | AppError::ItemNotFound { .. }
            | AppError::JobNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::DuplicateItem { .. } => StatusCode::CONFLICT,

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 422 Unprocessable Entity
            AppError::MalformedContent { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingError { .. }
            | AppError::ExtractionError { .. }
            | AppError::WebSearchError { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::TransientIo { .. }
            | AppError::ProviderUnavailable { .. }
            | AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
                request_id: None, // Filled by middleware
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::SourceNotFound { id: "test".into() };
        assert_eq!(err.code(), ErrorCode::SourceNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_duplicate_item_is_conflict() {
        let err = AppError::DuplicateItem {
            source_id: Uuid::nil(),
            identity_key: "guid-1".into(),
        };
        assert_eq!(err.code(), ErrorCode::DuplicateItem);
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(AppError::TransientIo {
            message: "timeout".into()
        }
        .is_transient());
        assert!(AppError::ProviderUnavailable {
            provider: "embedding".into(),
            message: "down".into()
        }
        .is_transient());
        assert!(!AppError::MalformedContent {
            message: "empty transcript".into()
        }
        .is_transient());
        assert!(!AppError::Validation {
            message: "bad url".into(),
            field: None
        }
        .is_transient());
    }

    #[test]
    fn test_provider_status_classification() {
        let rate_limited = AppError::from_provider_status(
            "embedding",
            StatusCode::TOO_MANY_REQUESTS,
            "slow down".into(),
        );
        assert!(rate_limited.is_transient());

        let server_err =
            AppError::from_provider_status("extraction", StatusCode::BAD_GATEWAY, "".into());
        assert!(server_err.is_transient());

        let rejected =
            AppError::from_provider_status("extraction", StatusCode::BAD_REQUEST, "".into());
        assert!(!rejected.is_transient());
        assert_eq!(rejected.code(), ErrorCode::MalformedContent);
    }
}
