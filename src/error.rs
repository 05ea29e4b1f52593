//! Error types for elastauth

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for elastauth
pub type Result<T> = std::result::Result<T, Error>;

/// elastauth errors
#[derive(Error, Debug)]
pub enum Error {
    /// No identity could be extracted from the inbound request
    #[error("Missing identity: {0}")]
    MissingIdentity(String),

    /// Token failed signature, expiry, or userinfo validation
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// A required claim mapping resolved to nothing
    #[error("Missing claim: {0}")]
    MissingClaim(String),

    /// Identity fields failed input validation
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// A cached credential could not be decoded or decrypted
    #[error("Cache entry corrupted: {0}")]
    CacheCorrupted(String),

    /// Cache backend I/O failure
    #[error("Cache error: {0}")]
    Cache(String),

    /// Password encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Ciphertext failed authentication, was truncated, or the key is wrong
    #[error("Decryption failed")]
    DecryptionFailed,

    /// No Elasticsearch host could be reached
    #[error("Elasticsearch unreachable: {0}")]
    ElasticsearchUnreachable(String),

    /// Elasticsearch answered with a non-success status
    #[error("Elasticsearch rejected request with status {status}: {body}")]
    ElasticsearchRejected {
        /// HTTP status returned by Elasticsearch
        status: u16,
        /// Response body, redacted
        body: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status that encodes this failure class
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            Self::MissingIdentity(_) | Self::InvalidToken(_) | Self::MissingClaim(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::ElasticsearchUnreachable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the caller caused this error
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Message that is safe to hand back to the caller.
    ///
    /// Server-side failures collapse to a generic message; their detail only
    /// goes to the log.
    #[must_use]
    pub fn public_message(&self) -> String {
        if self.is_client_error() {
            self.to_string()
        } else {
            "Internal server error".to_string()
        }
    }

    /// Short label for metrics and structured logs
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingIdentity(_) => "missing_identity",
            Self::InvalidToken(_) => "invalid_token",
            Self::MissingClaim(_) => "missing_claim",
            Self::ValidationFailed(_) => "validation",
            Self::CacheCorrupted(_) => "cache_corrupted",
            Self::Cache(_) => "cache",
            Self::EncryptionFailed(_) => "encryption",
            Self::DecryptionFailed => "decryption",
            Self::ElasticsearchUnreachable(_) => "elasticsearch_unreachable",
            Self::ElasticsearchRejected { .. } => "elasticsearch_rejected",
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Http(_) => "http",
            Self::Internal(_) => "internal",
        }
    }
}
