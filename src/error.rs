//! Error types for a3s-audit

use thiserror::Error;

/// Errors that can occur in the audit pipeline
#[derive(Debug, Error)]
pub enum AuditError {
    /// Broker connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Publish failure (network error, broker rejection, missing ack)
    #[error("Failed to publish audit log to topic '{topic}': {reason}")]
    Publish {
        topic: String,
        reason: String,
    },

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stream/topic creation or management error
    #[error("Stream error: {0}")]
    Stream(String),

    /// The queue feeding the dispatcher has been closed
    #[error("Audit queue closed")]
    QueueClosed,

    /// A retry loop was abandoned because the pipeline was shut down
    #[error("Audit pipeline cancelled")]
    Cancelled,

    /// Logging subscriber setup failure
    #[error("Logging error: {0}")]
    Logging(String),
}

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;
