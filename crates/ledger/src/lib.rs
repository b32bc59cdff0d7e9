//! # Ledger
//!
//! Acknowledgment bookkeeping primitives.
//!
//! 负责：
//! - Lock-free bounded message ring (`RingBuffer`)
//! - Min-heap of out-of-turn acknowledgments (`AckHeap`)
//! - Monotonic checkpoint over contiguous ids (`Checkpoint`)
//! - Per-consumer in-flight tracking (`InFlightLedger`)
//!
//! ## 使用示例
//!
//! ```
//! use contracts::Message;
//! use ledger::InFlightLedger;
//!
//! let ledger = InFlightLedger::new(4);
//! for id in 1..=3 {
//!     ledger.record(Message::empty(id));
//! }
//!
//! // out of order: nothing completes until id 1 is acknowledged
//! assert_eq!(ledger.acknowledge(2), Ok(0));
//! assert_eq!(ledger.acknowledge(1), Ok(2));
//! assert_eq!(ledger.checkpoint(), 2);
//! ```

mod checkpoint;
mod error;
mod heap;
mod inflight;
mod ring;

pub use checkpoint::{AckOutcome, Checkpoint};
pub use error::LedgerError;
pub use heap::AckHeap;
pub use inflight::InFlightLedger;
pub use ring::RingBuffer;
