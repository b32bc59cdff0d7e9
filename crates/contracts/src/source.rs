//! Source trait - ordered message supply consumed by the Dispatcher

use std::sync::Arc;

use crate::{ContractError, Message};

/// Delivery trigger
///
/// Invoked by a source whenever new messages may be available, prompting the
/// dispatcher to re-attempt delivery to its consumers.
pub type Trigger = Arc<dyn Fn() + Send + Sync>;

/// Message source trait
///
/// A source is shared by every consumer of a dispatcher. Implementations must
/// tolerate `next`, `on_ack`, `on_nack` and `on_sent` being called concurrently
/// from the dispatcher event loop and from any number of ack paths.
///
/// # Example
///
/// ```ignore
/// let source: Arc<dyn Source> = Arc::new(QosSource::new(config, persistence));
/// source.start(Arc::new(|| println!("messages available")))?;
/// while let Some(msg) = source.next() {
///     // deliver ...
///     source.on_ack(&msg);
/// }
/// ```
pub trait Source: Send + Sync {
    /// Take the next message
    ///
    /// `None` means nothing is available right now. It is not an error and
    /// the caller should retry after the next trigger.
    fn next(&self) -> Option<Message>;

    /// Message was acknowledged by its consumer and may be made durable
    fn on_ack(&self, msg: &Message);

    /// Message must be redelivered
    ///
    /// It was never durably acknowledged, so it goes back to the source as is.
    fn on_nack(&self, msg: Message);

    /// Message was handed to a consumer at least once
    fn on_sent(&self, msg: &Message);

    /// Start background workers
    ///
    /// # Errors
    /// Returns [`ContractError::AlreadyStarted`] when called twice
    fn start(&self, trigger: Trigger) -> Result<(), ContractError>;

    /// Number of messages the source keeps ready for delivery
    fn capacity(&self) -> usize;
}
