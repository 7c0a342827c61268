//! Error types for Absence Line.

use std::time::Duration;

/// Top-level error surfaced at the HTTP boundary.
///
/// The status-code mapping lives next to the router in `crate::http`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] TransportError),

    #[error("Classification failed: {0}")]
    Classification(#[from] ClassifierError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl Error {
    /// Shorthand for the fetch-then-404 pattern on sequential reads.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// SMS transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The provider rejected the send with an HTTP error status.
    #[error("Transport rejected send: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Transport request failed: {0}")]
    Request(String),

    #[error("Transport send timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid transport response: {0}")]
    InvalidResponse(String),
}

/// Classifier errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier request failed: {0}")]
    Request(String),

    #[error("Classification timed out after {0:?}")]
    Timeout(Duration),

    /// The classifier returned something outside the enumerated domains.
    #[error("Schema-invalid verdict: {0}")]
    InvalidVerdict(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the orchestration core.
pub type Result<T> = std::result::Result<T, Error>;
