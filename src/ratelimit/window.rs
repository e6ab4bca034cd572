//! Sliding window limiter.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use super::backend::Limiter;

/// A sliding window limiter backed by a trimmed log of admission times.
///
/// At most `max_count` requests are admitted within any trailing `window`.
/// The log never holds more than `max_count` instants: expired entries are
/// trimmed on every call and denied requests are not recorded.
pub struct SlidingWindow {
    max_count: usize,
    window: Duration,
    /// Admission instants, oldest first
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    /// Create an empty window. Parameters are validated by
    /// [`LimiterPolicy::sliding_window`](super::LimiterPolicy::sliding_window).
    pub fn new(max_count: usize, window: Duration) -> Self {
        Self {
            max_count,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_count.min(64))),
        }
    }
}

impl Limiter for SlidingWindow {
    fn allow_at(&self, now: Instant) -> bool {
        let mut timestamps = self.timestamps.lock();

        // Near process start the cutoff may predate the clock's origin, in
        // which case nothing can have expired yet.
        if let Some(cutoff) = now.checked_sub(self.window) {
            while timestamps.front().is_some_and(|ts| *ts < cutoff) {
                timestamps.pop_front();
            }
        }

        if timestamps.len() < self.max_count {
            // Keep the log ordered even if a caller passes a stale instant.
            let stamp = timestamps.back().map_or(now, |last| now.max(*last));
            timestamps.push_back(stamp);
            true
        } else {
            false
        }
    }
}
