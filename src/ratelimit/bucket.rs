//! Token bucket limiter.

use parking_lot::Mutex;
use tokio::time::Instant;

use super::backend::Limiter;

/// A token bucket that refills continuously and caps at its burst size.
///
/// `capacity` requests are admitted instantaneously; after that the bucket
/// sustains `refill_per_sec` requests per second.
pub struct TokenBucket {
    /// Maximum number of tokens (burst size)
    capacity: f64,
    /// Tokens added per second
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    /// Always within `0..=capacity`
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket. Parameters are validated by
    /// [`LimiterPolicy::token_bucket`](super::LimiterPolicy::token_bucket).
    pub fn new(capacity: f64, refill_per_sec: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
        }
    }
}

impl Limiter for TokenBucket {
    fn allow_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock();

        // A caller holding an older instant must not move the clock backward.
        let elapsed = now.saturating_duration_since(state.last_refill);
        let refilled = state.tokens + elapsed.as_secs_f64() * self.refill_per_sec;
        state.tokens = refilled.min(self.capacity);
        if now > state.last_refill {
            state.last_refill = now;
        }

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Tokens available at `now`, refilled without consuming.
    fn available_at(bucket: &TokenBucket, now: Instant) -> f64 {
        let state = bucket.state.lock();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        (state.tokens + elapsed * bucket.refill_per_sec).min(bucket.capacity)
    }

    #[test]
    fn test_burst_then_deny() {
        let start = Instant::now();
        let bucket = TokenBucket::new(5.0, 1.0, start);

        for i in 0..5 {
            assert!(bucket.allow_at(start), "request {} should be allowed", i + 1);
        }

        // The 6th request should be rejected
        assert!(!bucket.allow_at(start));
    }

    #[test]
    fn test_one_token_per_refill_period() {
        let start = Instant::now();
        let bucket = TokenBucket::new(3.0, 10.0, start);

        for _ in 0..3 {
            assert!(bucket.allow_at(start));
        }
        assert!(!bucket.allow_at(start));

        let later = start + Duration::from_millis(100);
        assert!(bucket.allow_at(later));
        assert!(!bucket.allow_at(later));
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let start = Instant::now();
        let bucket = TokenBucket::new(2.0, 100.0, start);

        assert!(bucket.allow_at(start));
        let much_later = start + Duration::from_secs(3600);
        assert_eq!(available_at(&bucket, much_later), 2.0);

        assert!(bucket.allow_at(much_later));
        assert!(bucket.allow_at(much_later));
        assert!(!bucket.allow_at(much_later));
    }

    #[test]
    fn test_tokens_never_negative() {
        let start = Instant::now();
        let bucket = TokenBucket::new(1.0, 1.0, start);

        assert!(bucket.allow_at(start));
        for _ in 0..10 {
            assert!(!bucket.allow_at(start));
        }
        assert!(available_at(&bucket, start) >= 0.0);
    }

    #[test]
    fn test_partial_refill_is_not_enough() {
        let start = Instant::now();
        let bucket = TokenBucket::new(1.0, 1.0, start);

        assert!(bucket.allow_at(start));
        assert!(!bucket.allow_at(start + Duration::from_millis(500)));
        assert!(bucket.allow_at(start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_stale_instant_does_not_rewind() {
        let start = Instant::now();
        let bucket = TokenBucket::new(1.0, 1.0, start + Duration::from_secs(1));

        // Observed before the bucket's refill point: no refill, no panic.
        assert!(bucket.allow_at(start));
        assert!(!bucket.allow_at(start));
    }
}
