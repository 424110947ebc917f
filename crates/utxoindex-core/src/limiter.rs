//! Token bucket rate limiter for flush calls.
//!
//! Tokens accrue at `refill_rate` per second up to `capacity`. Each flush
//! consumes one token; [`RateLimiter::acquire`] waits until one is available.
//! Refill follows the tokio clock, so paused test time drives it too.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::IngestError;
use crate::sleep::sleep;

/// Rate limiter configuration.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum tokens in the bucket (burst size).
    pub capacity: f64,
    /// Token refill rate (tokens per second).
    pub refill_rate: f64,
}

impl RateLimiterConfig {
    /// At most `rps` permits per second, no burst beyond a single permit.
    pub fn per_second(rps: f64) -> Self {
        Self {
            capacity: 1.0,
            refill_rate: rps,
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Thread-safe token bucket.
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Returns `None` when `refill_rate` is not a positive finite number (no limit).
    pub fn new(config: RateLimiterConfig) -> Option<Self> {
        if !(config.refill_rate.is_finite() && config.refill_rate > 0.0) {
            return None;
        }
        Some(Self {
            state: Mutex::new(BucketState {
                tokens: config.capacity,
                last_refill: Instant::now(),
            }),
            config,
        })
    }

    /// Try to take one permit without waiting.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Estimated wait before the next permit is available.
    pub fn wait_time(&self) -> Duration {
        let mut state = self.lock();
        self.refill(&mut state);
        let deficit = 1.0 - state.tokens;
        if deficit <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(deficit / self.config.refill_rate)
        }
    }

    /// Wait for a permit. With a token, the wait is abandoned on cancellation.
    pub async fn acquire(&self, cancel: Option<&CancellationToken>) -> Result<(), IngestError> {
        loop {
            if self.try_acquire() {
                return Ok(());
            }
            let wait = self.wait_time().max(Duration::from_millis(1));
            match cancel {
                Some(cancel) => sleep(cancel, wait).await?,
                None => tokio::time::sleep(wait).await,
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.config.refill_rate).min(self.config.capacity);
        state.last_refill = now;
    }
}
