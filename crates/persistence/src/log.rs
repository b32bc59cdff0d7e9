//! LogPersistence - reference persistence backend
//!
//! Reads come from an in-memory feed. Writes are queued on an unbounded
//! channel and applied by a single background writer that tracks the durable
//! checkpoint. Byte-level logging is not implemented; a production backend
//! sits behind the same `Persistence` contract.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use contracts::{ContractError, Message, Persistence, PersistenceConfig};
use ledger::{AckOutcome, Checkpoint, RingBuffer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

/// Queued durability write
#[derive(Debug, Clone, Copy)]
enum Write {
    Ack(u64),
    Sent(u64),
}

/// Where reads come from
enum Feed {
    /// Endless ids `1..` with empty payloads
    Sequential { last_id: AtomicU64 },
    /// Finite list, exhausted after the last message
    Preloaded(RingBuffer),
}

/// Counters maintained by the writer
#[derive(Debug, Default)]
struct WriterStats {
    acks: AtomicU64,
    sents: AtomicU64,
    duplicates: AtomicU64,
    checkpoint: AtomicU64,
}

/// Snapshot of persistence statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistenceStats {
    /// Acknowledgments applied (duplicates excluded)
    pub acks: u64,
    /// Sent notifications applied
    pub sents: u64,
    /// Acknowledgments already covered by the checkpoint
    pub duplicates: u64,
    /// Durable watermark: every id up to it is acknowledged
    pub checkpoint: u64,
}

/// Reference persistence backend
pub struct LogPersistence {
    capacity: usize,
    feed: Feed,
    writes: mpsc::UnboundedSender<Write>,
    stats: Arc<WriterStats>,
    closed: AtomicBool,
    cancel: CancellationToken,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl LogPersistence {
    /// Endless generator of ids `1..`
    ///
    /// # Panics
    /// Panics outside a tokio runtime: the writer task is spawned here.
    pub fn sequential(capacity: usize) -> Self {
        Self::with_feed(
            capacity,
            Feed::Sequential {
                last_id: AtomicU64::new(0),
            },
        )
    }

    /// Finite feed over the given messages, in order
    ///
    /// # Panics
    /// Panics outside a tokio runtime, like [`LogPersistence::sequential`].
    pub fn from_messages(capacity: usize, messages: impl IntoIterator<Item = Message>) -> Self {
        let messages: Vec<Message> = messages.into_iter().collect();
        let ring = RingBuffer::new(messages.len());
        for msg in messages {
            ring.put(msg);
        }
        Self::with_feed(capacity, Feed::Preloaded(ring))
    }

    /// Sequential backend sized from configuration
    ///
    /// # Panics
    /// Panics outside a tokio runtime, like [`LogPersistence::sequential`].
    pub fn from_config(config: &PersistenceConfig) -> Self {
        Self::sequential(config.capacity)
    }

    fn with_feed(capacity: usize, feed: Feed) -> Self {
        let (writes, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(WriterStats::default());
        let cancel = CancellationToken::new();

        let writer = tokio::spawn(apply_writes(rx, Arc::clone(&stats), cancel.clone()));
        info!(capacity, "LogPersistence started");

        Self {
            capacity: capacity.max(1),
            feed,
            writes,
            stats,
            closed: AtomicBool::new(false),
            cancel,
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Current statistics
    pub fn stats(&self) -> PersistenceStats {
        PersistenceStats {
            acks: self.stats.acks.load(Ordering::Acquire),
            sents: self.stats.sents.load(Ordering::Acquire),
            duplicates: self.stats.duplicates.load(Ordering::Acquire),
            checkpoint: self.stats.checkpoint.load(Ordering::Acquire),
        }
    }

    /// Durable watermark
    pub fn checkpoint(&self) -> u64 {
        self.stats.checkpoint.load(Ordering::Acquire)
    }

    fn enqueue(&self, write: Write) {
        if self.closed.load(Ordering::Acquire) {
            warn!(?write, "write after close ignored");
            return;
        }
        if self.writes.send(write).is_err() {
            warn!(?write, "persistence writer gone, write dropped");
        }
    }
}

impl Persistence for LogPersistence {
    async fn read_next(&self) -> Result<Option<Message>, ContractError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ContractError::PersistenceClosed);
        }
        let msg = match &self.feed {
            Feed::Sequential { last_id } => {
                Some(Message::empty(last_id.fetch_add(1, Ordering::AcqRel) + 1))
            }
            Feed::Preloaded(ring) => ring.next(),
        };
        Ok(msg)
    }

    fn write_ack(&self, msg: &Message) {
        self.enqueue(Write::Ack(msg.id()));
    }

    fn write_sent(&self, msg: &Message) {
        self.enqueue(Write::Sent(msg.id()));
    }

    #[instrument(name = "log_persistence_close", skip(self))]
    async fn close(&self) -> Result<(), ContractError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();

        let writer = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = writer {
            handle
                .await
                .map_err(|e| ContractError::Other(format!("persistence writer panicked: {e}")))?;
        }

        info!(stats = ?self.stats(), "LogPersistence closed");
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for LogPersistence {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Writer task: drains the queue until cancelled, then applies what is left
#[instrument(name = "persistence_writer_loop", skip_all)]
async fn apply_writes(
    mut rx: mpsc::UnboundedReceiver<Write>,
    stats: Arc<WriterStats>,
    cancel: CancellationToken,
) {
    debug!("persistence writer started");
    let mut checkpoint = Checkpoint::new();

    loop {
        tokio::select! {
            biased;
            write = rx.recv() => match write {
                Some(write) => apply(&mut checkpoint, &stats, write),
                None => break,
            },
            _ = cancel.cancelled() => {
                while let Ok(write) = rx.try_recv() {
                    apply(&mut checkpoint, &stats, write);
                }
                break;
            }
        }
    }

    debug!(checkpoint = checkpoint.value(), "persistence writer stopped");
}

fn apply(checkpoint: &mut Checkpoint, stats: &WriterStats, write: Write) {
    match write {
        Write::Ack(id) => match checkpoint.acknowledge(id) {
            AckOutcome::Duplicate => {
                stats.duplicates.fetch_add(1, Ordering::AcqRel);
                trace!(message_id = id, "duplicate ack");
            }
            outcome => {
                stats.acks.fetch_add(1, Ordering::AcqRel);
                if let AckOutcome::Advanced(_) = outcome {
                    stats.checkpoint.store(checkpoint.value(), Ordering::Release);
                    observability::record_checkpoint(checkpoint.value());
                }
                trace!(message_id = id, checkpoint = checkpoint.value(), "ack applied");
            }
        },
        Write::Sent(_) => {
            stats.sents.fetch_add(1, Ordering::AcqRel);
        }
    }
}
