//! # Persistence
//!
//! Reference implementation of the `Persistence` contract.
//!
//! `LogPersistence` serves reads from an in-memory feed and applies
//! acknowledgments on a background writer that keeps the durable checkpoint.
//!
//! ```ignore
//! use contracts::Persistence;
//! use persistence::LogPersistence;
//!
//! let store = LogPersistence::sequential(64);
//! let msg = store.read_next().await?;
//! store.close().await?;
//! ```

mod log;

pub use log::{LogPersistence, PersistenceStats};
