//! Per-client limiter registry.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::backend::{Limiter, LimiterPolicy};

/// A registry entry: the client's limiter plus the last time it was seen.
struct RegistryEntry {
    limiter: Arc<dyn Limiter>,
    /// Written only by the registry
    last_seen: Mutex<Instant>,
}

impl RegistryEntry {
    fn new(limiter: Arc<dyn Limiter>, now: Instant) -> Self {
        Self {
            limiter,
            last_seen: Mutex::new(now),
        }
    }

    fn touch(&self, now: Instant) {
        let mut last_seen = self.last_seen.lock();
        if now > *last_seen {
            *last_seen = now;
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_seen.lock())
    }
}

/// Maps client keys to limiters for one policy tier.
///
/// This struct is thread-safe and can be shared across multiple tasks. The
/// map is sharded, so requests for unrelated keys rarely contend, and each
/// limiter serializes its own state.
pub struct LimiterRegistry {
    /// Tier name used in logs
    name: String,
    policy: LimiterPolicy,
    /// How long an entry may go unseen before a sweep drops it
    idle_ttl: Duration,
    /// How often the idle reaper sweeps
    cleanup_interval: Duration,
    entries: DashMap<String, RegistryEntry>,
}

impl LimiterRegistry {
    /// Create an empty registry. `idle_ttl` and `cleanup_interval` are
    /// expected to be validated by the caller.
    pub fn new(
        name: impl Into<String>,
        policy: LimiterPolicy,
        idle_ttl: Duration,
        cleanup_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            idle_ttl,
            cleanup_interval,
            entries: DashMap::new(),
        }
    }

    /// Get the limiter for `key`, creating it on first sight.
    pub fn get_or_create(&self, key: &str) -> Arc<dyn Limiter> {
        self.get_or_create_at(key, Instant::now())
    }

    /// Get the limiter for `key` as observed at `now`.
    ///
    /// Concurrent callers racing on an unseen key all receive the same
    /// limiter: the fast path only takes a shard read lock, and the slow path
    /// re-checks under the shard write lock before inserting.
    pub fn get_or_create_at(&self, key: &str, now: Instant) -> Arc<dyn Limiter> {
        if let Some(entry) = self.entries.get(key) {
            entry.touch(now);
            return entry.limiter.clone();
        }

        let entry = self.entries.entry(key.to_owned()).or_insert_with(|| {
            debug!(
                tier = %self.name,
                key = %key,
                policy = ?self.policy,
                "Creating new limiter entry"
            );
            RegistryEntry::new(self.policy.build(now), now)
        });
        entry.touch(now);
        entry.limiter.clone()
    }

    /// Remove entries unseen for longer than `idle_ttl`.
    ///
    /// Returns the number of evicted entries.
    pub fn sweep(&self, idle_ttl: Duration) -> usize {
        self.sweep_at(Instant::now(), idle_ttl)
    }

    /// Remove entries unseen for longer than `idle_ttl` as of `now`.
    ///
    /// Shards are locked one at a time, never the whole map. An entry touched
    /// while its shard is being swept may still be dropped; the next request
    /// recreates it with a full quota.
    pub fn sweep_at(&self, now: Instant, idle_ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            let keep = entry.idle_for(now) <= idle_ttl;
            if !keep {
                trace!(tier = %self.name, key = %key, "Evicting idle limiter entry");
            }
            keep
        });
        let evicted = before.saturating_sub(self.entries.len());

        if evicted > 0 {
            info!(
                tier = %self.name,
                evicted = evicted,
                remaining = self.entries.len(),
                "Swept idle limiter entries"
            );
        }
        evicted
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &LimiterPolicy {
        &self.policy
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    /// Check whether `key` currently has an entry.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Get the number of tracked clients.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
