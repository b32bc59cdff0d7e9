//! Ledger error types

use thiserror::Error;

/// In-flight ledger errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    /// Ledger was drained and no longer tracks anything
    #[error("ledger closed")]
    Closed,

    /// Acknowledgment does not match anything in flight
    ///
    /// The ring and the heap disagree about what was delivered. This is an
    /// internal invariant violation, not a user-facing condition.
    #[error("in-flight ledger desynchronized at message {id}: {reason}")]
    Desynchronized { id: u64, reason: &'static str },
}

impl LedgerError {
    pub(crate) fn desynchronized(id: u64, reason: &'static str) -> Self {
        Self::Desynchronized { id, reason }
    }
}
