//! Error types for the monitoring pipeline.

use thiserror::Error;

/// Errors raised while evaluating a filter or sorting records.
///
/// These indicate a malformed query and are always surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("Unknown record property: {0}")]
    UnknownProperty(String),
    #[error("Property {0} holds a value that cannot be ordered")]
    NotOrderable(String),
    #[error("Cannot compare {left} with {right}")]
    Incomparable { left: String, right: String },
    #[error("IN comparison on {0} requires a list literal")]
    InRequiresList(String),
    #[error("Comparison needs exactly one property reference, got {0}")]
    PropertySides(usize),
}

/// Errors from record store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Lock error")]
    Lock,
    #[error("Query error: {0}")]
    Query(#[from] QueryError),
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Errors from the lifecycle manager.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("No request is bound to this context")]
    NotStarted,
    #[error("Request {0} is already bound to this context")]
    AlreadyBound(i64),
}

/// Errors from loading monitor configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failure reported by an enricher.
#[derive(Debug, Error)]
#[error("{enricher}: {message}")]
pub struct EnrichError {
    pub enricher: String,
    pub message: String,
}

impl EnrichError {
    pub fn new(enricher: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            enricher: enricher.into(),
            message: message.to_string(),
        }
    }
}
