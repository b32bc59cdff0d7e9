//! Dispatcher error types

use contracts::ContractError;
use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Push refused, the consumer is already unregistered
    ///
    /// The message was not recorded and must be requeued by the caller.
    #[error("consumer {consumer_id} is unregistered")]
    ConsumerUnregistered { consumer_id: u64 },

    /// Consumer was unregistered while the message was being recorded
    ///
    /// The message was already released back to the source.
    #[error("consumer {consumer_id} unregistered during delivery, message released")]
    Released { consumer_id: u64 },

    /// Receive handler failed, fatal to the consumer
    #[error("handler error: {0}")]
    Handler(#[source] ContractError),

    /// Source could not be started
    #[error("source error: {0}")]
    Source(#[source] ContractError),

    /// Invalid dispatcher configuration
    #[error("invalid config: {0}")]
    Config(#[source] ContractError),

    /// Constructed outside a tokio runtime
    #[error("dispatcher requires a tokio runtime")]
    NoRuntime,
}

impl DispatcherError {
    /// Create a configuration error
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config(ContractError::config_validation(field, message))
    }
}
