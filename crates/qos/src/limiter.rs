//! Token bucket limiter

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use contracts::Trigger;
use crossbeam_utils::CachePadded;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

/// Token bucket refilled to `rate` once per interval
///
/// A rate of 0 disables limiting: every acquire succeeds.
#[derive(Debug)]
pub struct TokenBucket {
    rate: u64,
    tokens: CachePadded<AtomicU64>,
}

impl TokenBucket {
    /// Create a full bucket
    pub fn new(rate: u64) -> Self {
        Self {
            rate,
            tokens: CachePadded::new(AtomicU64::new(rate)),
        }
    }

    /// Tokens granted per refill
    #[inline]
    pub fn rate(&self) -> u64 {
        self.rate
    }

    #[inline]
    pub fn is_unlimited(&self) -> bool {
        self.rate == 0
    }

    /// Tokens left in the current window
    pub fn available(&self) -> u64 {
        self.tokens.load(Ordering::SeqCst)
    }

    /// Take one token
    pub fn try_acquire(&self) -> bool {
        if self.is_unlimited() {
            return true;
        }
        loop {
            let tokens = self.tokens.load(Ordering::SeqCst);
            if tokens == 0 {
                return false;
            }
            if self
                .tokens
                .compare_exchange_weak(tokens, tokens - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return true;
            }
        }
    }

    /// Give back a token that was acquired but not used
    pub fn refund(&self) {
        if self.is_unlimited() {
            return;
        }
        let _ = self
            .tokens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |tokens| {
                (tokens < self.rate).then_some(tokens + 1)
            });
    }

    /// Reset to a full bucket
    pub fn refill(&self) {
        self.tokens.store(self.rate, Ordering::SeqCst);
    }
}

/// Refill timer: resets the bucket every `interval` and fires the trigger
#[instrument(name = "limiter_refill_loop", skip_all, fields(rate = bucket.rate()))]
pub(crate) async fn run_refill_timer(
    bucket: Arc<TokenBucket>,
    interval: Duration,
    trigger: Trigger,
    cancel: CancellationToken,
) {
    debug!(?interval, "limiter refill timer started");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                bucket.refill();
                trace!("limiter refilled");
                trigger();
            }
        }
    }

    debug!("limiter refill timer stopped");
}
