//! In-flight ledger: a ring and a heap kept in lockstep.
//!
//! The ring holds delivered messages in arrival order. The heap holds the
//! arrival positions of messages acknowledged out of turn. An entry leaves the
//! ring only when its position reaches the heap minimum, so arrival positions
//! (not message ids) drive reconciliation and redelivered messages may arrive
//! with lower ids than the ones already in flight.
//!
//! `record` is lock-free. `acknowledge` and `drain_unacknowledged` serialize
//! on the heap mutex, which is held only for the reconciliation itself.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use contracts::Message;
use crossbeam_utils::CachePadded;
use tracing::trace;

use crate::error::LedgerError;
use crate::heap::AckHeap;
use crate::ring::RingBuffer;

/// Ring + heap pair tracking one consumer's unacknowledged messages
pub struct InFlightLedger {
    ring: RingBuffer,
    acked: Mutex<AckHeap>,
    closed: AtomicBool,
    pending: CachePadded<AtomicUsize>,
    checkpoint: AtomicU64,
}

impl fmt::Debug for InFlightLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightLedger")
            .field("pending", &self.pending())
            .field("checkpoint", &self.checkpoint())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl InFlightLedger {
    /// Create a ledger for at most `capacity` in-flight messages
    pub fn new(capacity: usize) -> Self {
        let ring = RingBuffer::new(capacity);
        let acked = AckHeap::with_capacity(ring.capacity());
        Self {
            ring,
            acked: Mutex::new(acked),
            closed: AtomicBool::new(false),
            pending: CachePadded::new(AtomicUsize::new(0)),
            checkpoint: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AckHeap> {
        self.acked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of recorded but not yet reconciled messages
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Id of the most recently reconciled message (0 = none)
    #[inline]
    pub fn checkpoint(&self) -> u64 {
        self.checkpoint.load(Ordering::SeqCst)
    }

    /// Whether the ledger was drained
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Track a delivered message
    ///
    /// A record racing `drain_unacknowledged` may land after the drain. The
    /// caller must check `is_closed` afterwards and drain again if set.
    pub fn record(&self, msg: Message) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.ring.put(msg);
    }

    /// Acknowledge a message by id
    ///
    /// Returns how many entries were newly reconciled (0 when the ack arrived
    /// out of turn).
    ///
    /// # Errors
    /// - [`LedgerError::Closed`] after the ledger was drained
    /// - [`LedgerError::Desynchronized`] when the id is not in flight or was
    ///   already acknowledged
    pub fn acknowledge(&self, id: u64) -> Result<usize, LedgerError> {
        let mut acked = self.lock();
        if self.is_closed() {
            return Err(LedgerError::Closed);
        }

        let mut completed = 0;
        if self.ring.peek() == Some(id) {
            self.advance(id)?;
            completed += 1;
        } else {
            // a requeued message redelivered here occupies several positions
            let mut positions = self.ring.positions_of(id).peekable();
            if positions.peek().is_none() {
                return Err(LedgerError::desynchronized(id, "not in flight"));
            }
            let position = positions
                .find(|&position| !acked.contains(position))
                .ok_or_else(|| LedgerError::desynchronized(id, "acknowledged twice"))?;
            acked.push(position);
        }

        while let Some(position) = acked.peek() {
            if position != self.ring.next_position() {
                break;
            }
            let reconciled = self.ring.peek().unwrap_or(id);
            acked.pop();
            self.advance(reconciled)?;
            completed += 1;
        }

        if let Some(position) = acked.peek() {
            if position < self.ring.next_position() {
                return Err(LedgerError::desynchronized(id, "heap behind ring"));
            }
        }

        trace!(
            message_id = id,
            completed,
            deferred = acked.len(),
            "ledger acknowledged"
        );
        Ok(completed)
    }

    fn advance(&self, acked_id: u64) -> Result<(), LedgerError> {
        let (_, msg) = self
            .ring
            .claim()
            .ok_or_else(|| LedgerError::desynchronized(acked_id, "ring empty"))?;
        self.checkpoint.store(msg.id(), Ordering::SeqCst);
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    /// Close the ledger and take every message that was never acknowledged
    ///
    /// Messages acknowledged out of turn are skipped: their acknowledgment was
    /// already reported. Safe to call more than once; later calls return only
    /// what was recorded after the previous drain.
    pub fn drain_unacknowledged(&self) -> Vec<Message> {
        let mut acked = self.lock();
        self.closed.store(true, Ordering::SeqCst);

        let mut released = Vec::with_capacity(self.ring.len());
        while let Some((position, msg)) = self.ring.claim() {
            while acked.peek().is_some_and(|p| p < position) {
                acked.pop();
            }
            if acked.peek() == Some(position) {
                acked.pop();
                trace!(message_id = msg.id(), "skipping acknowledged message");
                continue;
            }
            released.push(msg);
        }

        acked.clear();
        self.pending.store(0, Ordering::SeqCst);
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use std::collections::HashSet;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn ledger_with(ids: &[u64]) -> InFlightLedger {
        let ledger = InFlightLedger::new(ids.len().max(1));
        for id in ids {
            ledger.record(Message::empty(*id));
        }
        ledger
    }

    #[test]
    fn test_in_order_acks() {
        let ledger = ledger_with(&[1, 2, 3]);
        assert_eq!(ledger.pending(), 3);

        for id in 1..=3 {
            assert_eq!(ledger.acknowledge(id), Ok(1));
            assert_eq!(ledger.checkpoint(), id);
        }
        assert_eq!(ledger.pending(), 0);
    }

    #[test]
    fn test_out_of_turn_ack_waits_for_gap() {
        let ledger = ledger_with(&[1, 2, 3]);

        assert_eq!(ledger.acknowledge(2), Ok(0));
        assert_eq!(ledger.checkpoint(), 0);
        assert_eq!(ledger.pending(), 3);

        assert_eq!(ledger.acknowledge(1), Ok(2));
        assert_eq!(ledger.checkpoint(), 2);
        assert_eq!(ledger.pending(), 1);
    }

    #[test]
    fn test_redelivered_lower_id_reconciles_by_arrival() {
        // id 3 was requeued elsewhere and arrives after 7
        let ledger = ledger_with(&[7, 3]);

        assert_eq!(ledger.acknowledge(3), Ok(0));
        assert_eq!(ledger.acknowledge(7), Ok(2));
        assert_eq!(ledger.checkpoint(), 3);
        assert_eq!(ledger.pending(), 0);
    }

    #[test]
    fn test_redelivered_copy_of_deferred_id_reconciles() {
        // id 2 acked out of turn with requeue, then redelivered to the same reader
        let ledger = ledger_with(&[1, 2, 3]);
        assert_eq!(ledger.acknowledge(2), Ok(0));
        ledger.record(Message::empty(2));

        assert_eq!(ledger.acknowledge(3), Ok(0));
        assert_eq!(ledger.acknowledge(2), Ok(0));
        assert_eq!(ledger.pending(), 4);

        assert_eq!(ledger.acknowledge(1), Ok(4));
        assert_eq!(ledger.checkpoint(), 2);
        assert_eq!(ledger.pending(), 0);
    }

    #[test]
    fn test_third_ack_of_twice_delivered_id_desynchronizes() {
        let ledger = ledger_with(&[1, 2, 3, 2]);
        assert_eq!(ledger.acknowledge(2), Ok(0));
        assert_eq!(ledger.acknowledge(2), Ok(0));
        assert!(matches!(
            ledger.acknowledge(2),
            Err(LedgerError::Desynchronized { id: 2, .. })
        ));
    }

    #[test]
    fn test_unknown_and_double_acks_desynchronize() {
        let ledger = ledger_with(&[1, 2, 3]);

        assert!(matches!(
            ledger.acknowledge(9),
            Err(LedgerError::Desynchronized { id: 9, .. })
        ));

        assert_eq!(ledger.acknowledge(3), Ok(0));
        assert!(matches!(
            ledger.acknowledge(3),
            Err(LedgerError::Desynchronized { id: 3, .. })
        ));

        assert_eq!(ledger.acknowledge(1), Ok(1));
        assert!(matches!(
            ledger.acknowledge(1),
            Err(LedgerError::Desynchronized { id: 1, .. })
        ));
    }

    #[test]
    fn test_drain_skips_acknowledged() {
        let ledger = ledger_with(&[1, 2, 3, 4]);
        ledger.acknowledge(2).unwrap();
        ledger.acknowledge(4).unwrap();

        let released: Vec<u64> = ledger
            .drain_unacknowledged()
            .iter()
            .map(Message::id)
            .collect();
        assert_eq!(released, vec![1, 3]);
        assert_eq!(ledger.pending(), 0);
        assert!(ledger.is_closed());
        assert_eq!(ledger.acknowledge(1), Err(LedgerError::Closed));
        assert!(ledger.drain_unacknowledged().is_empty());
    }

    #[test]
    fn test_record_after_drain_is_drained_again() {
        let ledger = ledger_with(&[1]);
        assert_eq!(ledger.drain_unacknowledged().len(), 1);

        ledger.record(Message::empty(2));
        assert!(ledger.is_closed());
        let late: Vec<u64> = ledger
            .drain_unacknowledged()
            .iter()
            .map(Message::id)
            .collect();
        assert_eq!(late, vec![2]);
    }

    #[test]
    fn test_permutation_completes_exactly_once() {
        const N: u64 = 64;
        let mut rng = rand::rng();

        for _ in 0..20 {
            let ids: Vec<u64> = (1..=N).collect();
            let ledger = ledger_with(&ids);

            let mut order = ids.clone();
            order.shuffle(&mut rng);

            let mut completed = 0;
            for (i, id) in order.iter().enumerate() {
                completed += ledger.acknowledge(*id).unwrap();
                if i + 1 < order.len() {
                    assert!(ledger.checkpoint() < N);
                }
            }
            assert_eq!(completed, N as usize);
            assert_eq!(ledger.checkpoint(), N);
            assert_eq!(ledger.pending(), 0);
        }
    }

    #[test]
    fn test_ack_racing_drain_releases_each_message_once() {
        const N: u64 = 256;
        let mut rng = rand::rng();

        for _ in 0..20 {
            let ids: Vec<u64> = (1..=N).collect();
            let ledger = Arc::new(ledger_with(&ids));
            let mut order = ids.clone();
            order.shuffle(&mut rng);

            let barrier = Arc::new(Barrier::new(2));
            let acker = {
                let ledger = Arc::clone(&ledger);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    order
                        .into_iter()
                        .filter(|id| ledger.acknowledge(*id).is_ok())
                        .collect::<Vec<_>>()
                })
            };
            let drainer = {
                let ledger = Arc::clone(&ledger);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    ledger
                        .drain_unacknowledged()
                        .iter()
                        .map(Message::id)
                        .collect::<Vec<_>>()
                })
            };

            let acknowledged = acker.join().unwrap();
            let released = drainer.join().unwrap();

            let acked_set: HashSet<u64> = acknowledged.iter().copied().collect();
            let released_set: HashSet<u64> = released.iter().copied().collect();
            assert_eq!(acked_set.len(), acknowledged.len());
            assert_eq!(released_set.len(), released.len());
            assert!(acked_set.is_disjoint(&released_set));
            assert_eq!(acked_set.len() + released_set.len(), N as usize);
        }
    }
}
