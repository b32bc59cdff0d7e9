//! Persistence trait - durable storage behind a Source
//!
//! Defines the abstract interface for storage backends.

use crate::{ContractError, Message};

/// Durable storage trait
///
/// Reads return messages in strictly increasing id order. Writes are
/// enqueued and applied in the background; they never block the caller,
/// which is usually an ack path running a consumer handler.
#[trait_variant::make(Persistence: Send)]
pub trait LocalPersistence {
    /// Read the next message
    ///
    /// `Ok(None)` means nothing is available right now.
    ///
    /// # Errors
    /// Returns read error (should include context)
    async fn read_next(&self) -> Result<Option<Message>, ContractError>;

    /// Record that a message was durably acknowledged
    fn write_ack(&self, msg: &Message);

    /// Record that a message was sent at least once
    fn write_sent(&self, msg: &Message);

    /// Flush pending writes and release resources
    async fn close(&self) -> Result<(), ContractError>;

    /// Maximum number of messages read ahead of acknowledgment
    fn capacity(&self) -> usize;
}
