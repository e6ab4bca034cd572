//! Limiter trait for abstracting over the admission algorithms.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::bucket::TokenBucket;
use super::window::SlidingWindow;
use crate::error::{Result, TollgateError};

/// Trait for per-client limiter implementations.
///
/// This trait abstracts over the token bucket and the sliding window so the
/// registry and the gate work with either. Implementations serialize their own
/// state; two concurrent calls never consume the same slot.
pub trait Limiter: Send + Sync {
    /// Decide a single request observed at `now`.
    fn allow_at(&self, now: Instant) -> bool;

    /// Decide a single request observed right now.
    fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }
}

/// Validated parameters from which per-client limiters are built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LimiterPolicy {
    /// Continuous refill at `refill_per_sec`, capped at `capacity` tokens.
    TokenBucket { capacity: f64, refill_per_sec: f64 },
    /// At most `max_count` admissions in any trailing `window`.
    SlidingWindow { max_count: usize, window: Duration },
}

impl LimiterPolicy {
    /// Token bucket policy. Both values must be positive and finite.
    pub fn token_bucket(capacity: f64, refill_per_sec: f64) -> Result<Self> {
        if !(capacity.is_finite() && capacity > 0.0) {
            return Err(TollgateError::invalid_policy(
                "token_bucket",
                format!("burst must be positive, got {}", capacity),
            ));
        }
        if !(refill_per_sec.is_finite() && refill_per_sec > 0.0) {
            return Err(TollgateError::invalid_policy(
                "token_bucket",
                format!("rate must be positive, got {}", refill_per_sec),
            ));
        }
        Ok(LimiterPolicy::TokenBucket {
            capacity,
            refill_per_sec,
        })
    }

    /// Sliding window policy. Both values must be non-zero.
    pub fn sliding_window(max_count: usize, window: Duration) -> Result<Self> {
        if max_count == 0 {
            return Err(TollgateError::invalid_policy(
                "sliding_window",
                "max count must be at least 1",
            ));
        }
        if window.is_zero() {
            return Err(TollgateError::invalid_policy(
                "sliding_window",
                "window must be non-zero",
            ));
        }
        Ok(LimiterPolicy::SlidingWindow { max_count, window })
    }

    /// Human-readable explanation for a request this policy denied.
    pub fn denial_message(&self) -> String {
        match *self {
            LimiterPolicy::TokenBucket { .. } => {
                "Too many requests, please try again later".to_string()
            }
            LimiterPolicy::SlidingWindow { max_count, window } => format!(
                "Too many requests, at most {} allowed per {}s",
                max_count,
                window.as_secs_f64()
            ),
        }
    }

    /// Build a fresh limiter: a full bucket or an empty window.
    pub fn build(&self, now: Instant) -> Arc<dyn Limiter> {
        match *self {
            LimiterPolicy::TokenBucket {
                capacity,
                refill_per_sec,
            } => Arc::new(TokenBucket::new(capacity, refill_per_sec, now)),
            LimiterPolicy::SlidingWindow { max_count, window } => {
                Arc::new(SlidingWindow::new(max_count, window))
            }
        }
    }
}
