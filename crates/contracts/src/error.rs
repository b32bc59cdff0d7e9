//! Layered error definitions
//!
//! Categorized by source: config / handler / persistence / source

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Handler Errors =====
    /// Receive handler rejected a message
    #[error("handler of consumer {consumer_id} failed: {message}")]
    Handler { consumer_id: u64, message: String },

    // ===== Persistence Errors =====
    /// Reading the next message from storage failed
    #[error("persistence read error: {message}")]
    PersistenceRead { message: String },

    /// Persistence was already closed
    #[error("persistence closed")]
    PersistenceClosed,

    // ===== Source Errors =====
    /// Source workers were already started
    #[error("source already started")]
    AlreadyStarted,

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create handler error
    pub fn handler(consumer_id: u64, message: impl Into<String>) -> Self {
        Self::Handler {
            consumer_id,
            message: message.into(),
        }
    }

    /// Create persistence read error
    pub fn persistence_read(message: impl Into<String>) -> Self {
        Self::PersistenceRead {
            message: message.into(),
        }
    }
}
