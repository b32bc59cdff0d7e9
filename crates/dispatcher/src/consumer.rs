//! Consumer - one registered receiver with its in-flight ledger

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use contracts::{Message, ReceiveHandler, Source};
use ledger::{InFlightLedger, LedgerError};
use tracing::{error, info, trace};

use crate::dispatcher::{Event, Shared};
use crate::error::DispatcherError;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const RERUN: u8 = 2;

/// Registered consumer handle
///
/// Obtained from [`Dispatcher::register`](crate::Dispatcher::register).
/// Every delivered message must eventually be passed back to [`Consumer::ack`],
/// or released by [`Consumer::unregister`].
pub struct Consumer {
    id: u64,
    active: AtomicBool,
    dispatch_state: AtomicU8,
    ledger: InFlightLedger,
    handler: ReceiveHandler,
    source: Arc<dyn Source>,
    dispatcher: Weak<Shared>,
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .field("ledger", &self.ledger)
            .finish()
    }
}

impl Consumer {
    pub(crate) fn new(id: u64, quota: usize, handler: ReceiveHandler, shared: &Arc<Shared>) -> Self {
        Self {
            id,
            active: AtomicBool::new(true),
            dispatch_state: AtomicU8::new(IDLE),
            ledger: InFlightLedger::new(quota),
            handler,
            source: Arc::clone(shared.source()),
            dispatcher: Arc::downgrade(shared),
        }
    }

    /// Process-unique consumer id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Delivered but not yet reconciled messages
    pub fn pending(&self) -> usize {
        self.ledger.pending()
    }

    /// Id of the last message whose acknowledgment completed in order
    pub fn checkpoint(&self) -> u64 {
        self.ledger.checkpoint()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Record a message and hand it to the handler
    pub(crate) fn push(&self, msg: &Message) -> Result<(), DispatcherError> {
        if !self.is_active() {
            return Err(DispatcherError::ConsumerUnregistered {
                consumer_id: self.id,
            });
        }

        self.ledger.record(msg.clone());
        if self.ledger.is_closed() {
            // unregister drained concurrently and may have missed this record
            self.requeue(self.ledger.drain_unacknowledged());
            return Err(DispatcherError::Released {
                consumer_id: self.id,
            });
        }

        trace!(consumer_id = self.id, message_id = msg.id(), "delivering message");
        observability::record_pending(self.id, self.pending());
        (self.handler)(msg).map_err(DispatcherError::Handler)
    }

    /// Acknowledge a delivered message
    ///
    /// With `requeue` the message goes back to the source for redelivery,
    /// otherwise it is durably acknowledged and the freed quota is refilled
    /// on the calling thread. No-op once the consumer is unregistered.
    ///
    /// # Panics
    /// Panics when `msg` was never delivered to this consumer or was already
    /// acknowledged: the in-flight ledger can no longer be trusted.
    pub fn ack(&self, msg: &Message, requeue: bool) {
        if !self.is_active() {
            trace!(consumer_id = self.id, message_id = msg.id(), "ack after unregister ignored");
            return;
        }

        match self.ledger.acknowledge(msg.id()) {
            Ok(completed) => {
                trace!(
                    consumer_id = self.id,
                    message_id = msg.id(),
                    completed,
                    checkpoint = self.ledger.checkpoint(),
                    "message acknowledged"
                );
            }
            // unregister won the race, the drain owns the message now
            Err(LedgerError::Closed) => return,
            Err(e) => {
                error!(consumer_id = self.id, error = %e, "in-flight ledger corrupted");
                panic!("consumer {}: {e}", self.id);
            }
        }
        observability::record_acked(self.id, requeue);

        match self.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.ack(self, msg, requeue),
            None if requeue => self.source.on_nack(msg.clone()),
            None => self.source.on_ack(msg),
        }
    }

    /// Unregister and release every unacknowledged message to the source
    ///
    /// Idempotent; only the first call has an effect.
    pub fn unregister(&self) {
        if self
            .active
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.enqueue(Event::Unregister(self.id));
        }
        let released = self.ledger.drain_unacknowledged();
        info!(consumer_id = self.id, requeued = released.len(), "consumer unregistered");
        self.requeue(released);
    }

    fn requeue(&self, released: Vec<Message>) {
        if released.is_empty() {
            return;
        }
        let count = released.len();
        for msg in released {
            self.source.on_nack(msg);
        }
        observability::record_requeued(count);
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.request_dispatch();
        }
    }

    /// Try to become the single filler of this consumer
    ///
    /// On failure the running filler is told to make another pass.
    pub(crate) fn begin_dispatch(&self) -> bool {
        let previous = self
            .dispatch_state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |state| match state {
                IDLE => Some(RUNNING),
                RUNNING => Some(RERUN),
                _ => None,
            });
        previous == Ok(IDLE)
    }

    /// Release filler ownership; `false` means another pass was requested
    pub(crate) fn finish_dispatch(&self) -> bool {
        if self
            .dispatch_state
            .compare_exchange(RUNNING, IDLE, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return true;
        }
        self.dispatch_state.store(RUNNING, Ordering::SeqCst);
        false
    }
}
