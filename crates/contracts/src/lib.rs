//! # Contracts
//!
//! Frozen interface contracts shared by every broker crate: the message model,
//! the `Source` / `Persistence` traits and the configuration structures.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Id Model
//! - Message ids are produced by the persistence layer in strictly increasing order
//! - Ids start at 1; a checkpoint of 0 means nothing has been acknowledged yet

mod broker_config;
mod error;
mod handler;
mod message;
mod persistence;
mod source;

pub use broker_config::*;
pub use error::*;
pub use handler::{ReceiveHandler, handler};
pub use message::Message;
pub use persistence::{LocalPersistence, Persistence};
pub use source::{Source, Trigger};
