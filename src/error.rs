//! Error types for the invoice reimbursement service.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::retry::Retryable;

/// Errors raised while talking to the LLM / embedding API.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM configuration error: {0}")]
    Config(String),

    #[error("LLM request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("LLM API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("LLM returned no content")]
    EmptyResponse,

    #[error("invalid LLM response: {0}")]
    InvalidResponse(String),
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        match self {
            LlmError::Request(e) => e.is_timeout() || e.is_connect(),
            LlmError::Api { status, .. } => *status == 429 || *status >= 500,
            LlmError::Config(_) | LlmError::EmptyResponse | LlmError::InvalidResponse(_) => false,
        }
    }
}

/// Errors related to vector store operations.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("failed to connect to vector store: {0}")]
    Connection(String),

    #[error("collection error: {0}")]
    Collection(String),

    #[error("upsert error: {0}")]
    Upsert(String),

    #[error("search error: {0}")]
    Search(String),

    #[error("delete error: {0}")]
    Delete(String),

    #[error("embedding has {actual} dimensions, collection expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors raised while turning uploaded bytes into text.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("unsupported document format {mime_type} for {file_name}; only PDF and text files are supported")]
    UnsupportedFormat { file_name: String, mime_type: String },

    #[error("failed to extract text from PDF {file_name}: {message}")]
    Pdf { file_name: String, message: String },

    #[error("{0} is not valid UTF-8 text")]
    Encoding(String),

    #[error("no text could be extracted from {0}")]
    Empty(String),
}

/// Errors raised while unpacking an invoice archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Invalid ZIP file format: {0}")]
    InvalidZip(String),

    #[error("No PDF files found in ZIP archive")]
    NoInvoices,

    #[error("archive entry {name} is {size} bytes, above the {limit} byte limit")]
    EntryTooLarge { name: String, size: u64, limit: u64 },

    #[error("failed to read archive entry {name}: {source}")]
    Read {
        name: String,
        source: std::io::Error,
    },
}

/// Errors related to configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Application-level errors returned by services and HTTP handlers.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("File size exceeds maximum allowed size of {limit_mb}MB")]
    PayloadTooLarge { limit_mb: usize },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Processing failed: {0}")]
    Processing(String),

    #[error("Chat processing failed: {0}")]
    Chat(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0} not found")]
    NotFound(String),
}

impl AppError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::PayloadTooLarge { .. } | AppError::Archive(_) | AppError::Document(_) => {
                "FILE_ERROR"
            }
            AppError::Processing(_) => "PROCESSING_ERROR",
            AppError::Chat(_) => "CHAT_ERROR",
            AppError::Search(_) => "SEARCH_ERROR",
            AppError::Llm(_) => "LLM_ERROR",
            AppError::VectorStore(_) => "VECTOR_STORE_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Archive(_) | AppError::Document(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Llm(_) => StatusCode::BAD_GATEWAY,
            AppError::VectorStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Processing(_)
            | AppError::Chat(_)
            | AppError::Search(_)
            | AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Malformed request bodies and query strings are client errors like any other.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("{} ({})", self, self.error_code());
        }
        let body = Json(json!({
            "detail": self.to_string(),
            "error_code": self.error_code(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::Validation("Message cannot be empty".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Archive(ArchiveError::NoInvoices).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::PayloadTooLarge { limit_mb: 1 }.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AppError::Llm(LlmError::EmptyResponse).error_code(),
            "LLM_ERROR"
        );
    }

    #[test]
    fn test_llm_retryable() {
        let throttled = LlmError::Api {
            status: 429,
            message: "quota".into(),
        };
        let bad_request = LlmError::Api {
            status: 400,
            message: "bad".into(),
        };
        assert!(throttled.is_retryable());
        assert!(!bad_request.is_retryable());
        assert!(!LlmError::EmptyResponse.is_retryable());
    }
}
