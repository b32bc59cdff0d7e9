//! QosSource - rate-limited source over a persistence backend
//!
//! Messages are read ahead from persistence into a prefetch ring by a
//! replenishment worker. `next` hands them out while the token bucket allows.
//! Every ack requests one replacement read, so the prefetch ring plus the
//! messages in flight never exceed the persistence capacity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_channel::{unbounded, Receiver, Sender};
use contracts::{ContractError, Message, Persistence, QosConfig, ReadErrorPolicy, Source, Trigger};
use ledger::RingBuffer;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::limiter::{run_refill_timer, TokenBucket};

/// Rate-limited source
pub struct QosSource<P> {
    config: QosConfig,
    capacity: usize,
    limiter: Arc<TokenBucket>,
    prefetch: Arc<RingBuffer>,
    persistence: Arc<P>,
    refill_tx: Sender<usize>,
    refill_rx: Receiver<usize>,
    started: AtomicBool,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<P> QosSource<P>
where
    P: Persistence + Sync + 'static,
{
    /// Create a source reading from `persistence`
    ///
    /// Nothing is read until [`Source::start`].
    pub fn new(config: QosConfig, persistence: P) -> Self {
        let capacity = persistence.capacity().max(1);
        let (refill_tx, refill_rx) = unbounded();

        Self {
            limiter: Arc::new(TokenBucket::new(config.rate_per_sec)),
            prefetch: Arc::new(RingBuffer::new(capacity)),
            persistence: Arc::new(persistence),
            config,
            capacity,
            refill_tx,
            refill_rx,
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Underlying persistence backend
    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    /// Messages currently read ahead
    pub fn prefetched(&self) -> usize {
        self.prefetch.len()
    }

    /// Tokens left in the current limiter window
    pub fn available_tokens(&self) -> u64 {
        self.limiter.available()
    }

    fn request_refill(&self, count: usize) {
        if self.refill_tx.try_send(count).is_err() {
            debug!(count, "replenishment worker gone, refill request dropped");
        }
    }

    /// Stop background workers and close persistence
    #[instrument(name = "qos_source_shutdown", skip(self))]
    pub async fn shutdown(&self) -> Result<(), ContractError> {
        self.cancel.cancel();
        self.refill_tx.close();

        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "qos worker ended abnormally");
            }
        }

        self.persistence.close().await?;
        info!("QosSource stopped");
        Ok(())
    }
}

impl<P> Source for QosSource<P>
where
    P: Persistence + Sync + 'static,
{
    fn next(&self) -> Option<Message> {
        if !self.limiter.try_acquire() {
            observability::record_throttled();
            return None;
        }
        let msg = self.prefetch.next();
        if msg.is_none() {
            self.limiter.refund();
        }
        msg
    }

    fn on_ack(&self, msg: &Message) {
        self.persistence.write_ack(msg);
        self.request_refill(1);
    }

    fn on_nack(&self, msg: Message) {
        trace!(message_id = msg.id(), "message returned to prefetch ring");
        self.prefetch.put(msg);
    }

    fn on_sent(&self, msg: &Message) {
        self.persistence.write_sent(msg);
    }

    fn start(&self, trigger: Trigger) -> Result<(), ContractError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ContractError::AlreadyStarted);
        }
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(ContractError::Other(format!("QosSource needs a tokio runtime: {e}")));
            }
        };

        // the timer runs even when unlimited: its tick is what redelivers requeued messages
        let workers = vec![
            runtime.spawn(run_refill_timer(
                Arc::clone(&self.limiter),
                Duration::from_millis(self.config.refill_interval_ms),
                Arc::clone(&trigger),
                self.cancel.clone(),
            )),
            runtime.spawn(replenish(
                Arc::clone(&self.persistence),
                Arc::clone(&self.prefetch),
                self.refill_rx.clone(),
                self.config.read_error_policy,
                trigger,
                self.cancel.clone(),
            )),
        ];
        *self.workers.lock().unwrap_or_else(PoisonError::into_inner) = workers;

        info!(
            capacity = self.capacity,
            rate = self.config.rate_per_sec,
            "QosSource started"
        );
        self.request_refill(self.capacity);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<P> Drop for QosSource<P> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Replenishment worker: serves refill requests from persistence
#[instrument(name = "qos_replenish_loop", skip_all)]
async fn replenish<P>(
    persistence: Arc<P>,
    prefetch: Arc<RingBuffer>,
    requests: Receiver<usize>,
    policy: ReadErrorPolicy,
    trigger: Trigger,
    cancel: CancellationToken,
) where
    P: Persistence + Sync + 'static,
{
    debug!(?policy, "replenishment worker started");

    loop {
        let mut requested = tokio::select! {
            _ = cancel.cancelled() => break,
            request = requests.recv() => match request {
                Ok(count) => count,
                Err(_) => break,
            },
        };
        while let Ok(count) = requests.try_recv() {
            requested += count;
        }

        let mut filled = 0;
        for _ in 0..requested {
            match read_one(persistence.as_ref(), policy, &cancel).await {
                Read::Message(msg) => {
                    prefetch.put(msg);
                    filled += 1;
                }
                Read::Skipped => {}
                Read::Exhausted => break,
            }
        }

        observability::record_prefetch_refill(requested, filled);
        trace!(requested, filled, "prefetch replenished");
        if filled > 0 {
            trigger();
        }
    }

    debug!("replenishment worker stopped");
}

enum Read {
    Message(Message),
    /// Read failed and the policy gave up on this unit
    Skipped,
    /// Nothing to read right now, or shutting down
    Exhausted,
}

async fn read_one<P>(persistence: &P, policy: ReadErrorPolicy, cancel: &CancellationToken) -> Read
where
    P: Persistence + Sync,
{
    let (attempts, backoff) = match policy {
        ReadErrorPolicy::Skip => (1, Duration::ZERO),
        ReadErrorPolicy::Retry {
            attempts,
            backoff_ms,
        } => (attempts.max(1), Duration::from_millis(backoff_ms)),
    };

    for attempt in 1..=attempts {
        match persistence.read_next().await {
            Ok(Some(msg)) => return Read::Message(msg),
            Ok(None) => return Read::Exhausted,
            Err(ContractError::PersistenceClosed) => return Read::Exhausted,
            Err(e) => {
                observability::record_read_failure();
                warn!(attempt, attempts, error = %e, "persistence read failed");
            }
        }
        if attempt < attempts {
            tokio::select! {
                _ = cancel.cancelled() => return Read::Exhausted,
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }
    Read::Skipped
}
