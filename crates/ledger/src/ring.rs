//! Lock-free bounded ring of messages.
//!
//! Positions are 1-based and grow forever; a position maps to slot
//! `position & mask`. `head` is the last reserved position, `tail` the last
//! claimed one, so the claimable window is `(tail, head]`.
//!
//! - `put` reserves a position with `fetch_add` and never blocks
//! - `next` claims with a CAS on `tail`, retrying only when a racing caller won
//! - `peek` inspects the next claimable slot without advancing
//!
//! `put` does not detect overflow. Capacity must be sized to the known upper
//! bound of unclaimed messages, otherwise a wrapping producer overwrites a
//! slot that has not been claimed yet.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use contracts::Message;
use crossbeam_utils::atomic::AtomicCell;
use crossbeam_utils::CachePadded;

/// Ring slot
///
/// `stamp` is the position last published into the slot (0 = never).
/// `id` mirrors the message id so it can be inspected without taking the value.
#[derive(Default)]
struct Slot {
    stamp: AtomicU64,
    id: AtomicU64,
    value: AtomicCell<Option<Message>>,
}

/// Bounded multi-producer / multi-consumer message ring
pub struct RingBuffer {
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    mask: u64,
    slots: Box<[Slot]>,
}

impl fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RingBuffer")
            .field("head", &self.head.load(Ordering::Relaxed))
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .field("capacity", &self.slots.len())
            .finish()
    }
}

impl RingBuffer {
    /// Create a ring holding at least `capacity` messages
    ///
    /// Capacity is rounded up to the next power of two.
    pub fn new(capacity: usize) -> Self {
        let size = capacity.max(1).next_power_of_two();
        let slots = (0..size).map(|_| Slot::default()).collect::<Vec<_>>();

        Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            mask: size as u64 - 1,
            slots: slots.into_boxed_slice(),
        }
    }

    #[inline]
    fn slot(&self, position: u64) -> &Slot {
        &self.slots[(position & self.mask) as usize]
    }

    /// Number of slots
    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of reserved but unclaimed positions
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::SeqCst);
        let tail = self.tail.load(Ordering::SeqCst);
        head.saturating_sub(tail) as usize
    }

    /// Check if nothing is claimable
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a message
    pub fn put(&self, msg: Message) {
        let position = self.head.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = self.slot(position);
        slot.id.store(msg.id(), Ordering::SeqCst);
        slot.value.store(Some(msg));
        slot.stamp.store(position, Ordering::SeqCst);
    }

    /// Claim the next message
    ///
    /// Returns `None` when the ring is empty or the next position is reserved
    /// but its producer has not finished publishing yet.
    pub fn next(&self) -> Option<Message> {
        self.claim().map(|(_, msg)| msg)
    }

    /// Claim the next message together with its position
    pub fn claim(&self) -> Option<(u64, Message)> {
        loop {
            let read = self.tail.load(Ordering::SeqCst);
            let next = read + 1;
            if next > self.head.load(Ordering::SeqCst) {
                return None;
            }
            if self.slot(next).stamp.load(Ordering::SeqCst) < next {
                return None;
            }
            if self
                .tail
                .compare_exchange_weak(read, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return self.slot(next).value.take().map(|msg| (next, msg));
            }
            std::hint::spin_loop();
        }
    }

    /// Id of the next claimable message, without advancing
    ///
    /// Only meaningful when the caller already serializes its own claims,
    /// otherwise a concurrent `next` may claim the slot in between.
    pub fn peek(&self) -> Option<u64> {
        self.peek_position().map(|(_, id)| id)
    }

    /// Position and id of the next claimable message
    pub fn peek_position(&self) -> Option<(u64, u64)> {
        let next = self.tail.load(Ordering::SeqCst) + 1;
        if next > self.head.load(Ordering::SeqCst) {
            return None;
        }
        let slot = self.slot(next);
        (slot.stamp.load(Ordering::SeqCst) >= next).then(|| (next, slot.id.load(Ordering::SeqCst)))
    }

    /// Position of the next claim
    #[inline]
    pub fn next_position(&self) -> u64 {
        self.tail.load(Ordering::SeqCst) + 1
    }

    /// Find the position of an unclaimed message by id
    ///
    /// Scans the claimable window, so the cost is bounded by the number of
    /// unclaimed messages.
    pub fn position_of(&self, id: u64) -> Option<u64> {
        self.positions_of(id).next()
    }

    /// Every unclaimed position holding `id`, oldest first
    ///
    /// A message requeued and redelivered to the same reader occupies more
    /// than one position.
    pub fn positions_of(&self, id: u64) -> impl Iterator<Item = u64> + '_ {
        let head = self.head.load(Ordering::SeqCst);
        let tail = self.tail.load(Ordering::SeqCst);
        (tail + 1..=head).filter(move |&position| {
            let slot = self.slot(position);
            slot.stamp.load(Ordering::SeqCst) == position && slot.id.load(Ordering::SeqCst) == id
        })
    }
}
