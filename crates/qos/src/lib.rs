//! # QoS
//!
//! Rate-limited `Source` implementation.
//!
//! 负责：
//! - Token bucket limiter refilled on a timer (`TokenBucket`)
//! - Prefetch ring replenished from a `Persistence` backend
//! - Explicit policy for failed persistence reads (`ReadErrorPolicy`)
//!
//! ## 使用示例
//!
//! ```ignore
//! use contracts::{QosConfig, Source};
//! use persistence::LogPersistence;
//! use qos::QosSource;
//!
//! let source = QosSource::new(QosConfig::default(), LogPersistence::sequential(64));
//! source.start(Arc::new(|| {}))?;
//! ```

mod limiter;
mod source;

pub use limiter::TokenBucket;
pub use source::QosSource;
