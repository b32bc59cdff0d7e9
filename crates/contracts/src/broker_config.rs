//! Broker configuration contracts that can be shared across crates.

use serde::{Deserialize, Serialize};

/// Top level broker configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Dispatcher configuration
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Rate-limited source configuration
    #[serde(default)]
    pub source: QosConfig,

    /// Persistence configuration
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

/// Dispatcher configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Capacity of the event queue drained by the event loop
    pub event_queue_size: usize,
    /// Maximum in-flight (unacknowledged) messages per consumer
    pub quota: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            event_queue_size: 1024,
            quota: 64,
        }
    }
}

/// Rate-limited source configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QosConfig {
    /// Messages per refill interval (0 = unlimited)
    pub rate_per_sec: u64,
    /// Token bucket refill interval in milliseconds
    pub refill_interval_ms: u64,
    /// What the replenishment worker does when a persistence read fails
    pub read_error_policy: ReadErrorPolicy,
}

impl Default for QosConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 0,
            refill_interval_ms: 1000,
            read_error_policy: ReadErrorPolicy::default(),
        }
    }
}

/// Policy for failed persistence reads during replenishment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ReadErrorPolicy {
    /// Log and give up on that replenishment unit
    #[default]
    Skip,
    /// Retry the read a bounded number of times, then skip
    Retry {
        /// Total read attempts per unit
        attempts: u32,
        /// Delay between attempts in milliseconds
        backoff_ms: u64,
    },
}

/// Persistence configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Read-ahead capacity, sizes the prefetch ring
    pub capacity: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}
