//! Message - the unit flowing through the broker

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Broker message
///
/// Immutable once built. The payload is reference counted, so cloning a
/// message never copies the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: u64,
    data: Bytes,
}

impl Message {
    /// Create a message with the given id and payload
    pub fn new(id: u64, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// Create a message without payload
    pub fn empty(id: u64) -> Self {
        Self {
            id,
            data: Bytes::new(),
        }
    }

    /// Unique, increasing message id
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Opaque payload
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }
}
