//! ReceiveHandler - consumer delivery callback

use std::sync::Arc;

use crate::{ContractError, Message};

/// Receive handler type
///
/// Invoked once per delivered message, synchronously on the thread that
/// pushed the message. Returning an error is fatal to the consumer: it is
/// unregistered and its in-flight messages are requeued.
pub type ReceiveHandler = Arc<dyn Fn(&Message) -> Result<(), ContractError> + Send + Sync>;

/// Wrap a closure into a [`ReceiveHandler`]
pub fn handler<F>(f: F) -> ReceiveHandler
where
    F: Fn(&Message) -> Result<(), ContractError> + Send + Sync + 'static,
{
    Arc::new(f)
}
