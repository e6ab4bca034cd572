//! Background idle eviction.

use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::registry::LimiterRegistry;

/// A background task that periodically sweeps one registry.
///
/// The reaper only ever takes the registry's shard locks one at a time, so
/// request handling is never blocked for a whole sweep.
pub struct IdleReaper {
    name: String,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl IdleReaper {
    /// Spawn a reaper on the current tokio runtime, firing every
    /// `registry.cleanup_interval()`.
    pub fn spawn(registry: Arc<LimiterRegistry>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let name = registry.name().to_string();

        info!(
            tier = %name,
            interval = ?registry.cleanup_interval(),
            idle_ttl = ?registry.idle_ttl(),
            "Starting idle reaper"
        );

        let handle = tokio::spawn(run(registry, stop_rx));
        Self {
            name,
            stop_tx,
            handle,
        }
    }

    /// Signal the reaper to stop and wait for it to exit.
    pub async fn stop(self) {
        // The receiver is gone only if the task already exited.
        let _ = self.stop_tx.send(true);

        if let Err(e) = self.handle.await {
            warn!(tier = %self.name, error = %e, "Idle reaper exited abnormally");
        }
        info!(tier = %self.name, "Idle reaper stopped");
    }
}

async fn run(registry: Arc<LimiterRegistry>, mut stop_rx: watch::Receiver<bool>) {
    let idle_ttl = registry.idle_ttl();
    let mut ticker = time::interval(registry.cleanup_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick completes immediately; nothing can be idle yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let evicted = registry.sweep(idle_ttl);
                debug!(tier = %registry.name(), evicted = evicted, "Idle sweep finished");
            }
            // Either a stop request or the handle being dropped.
            _ = stop_rx.changed() => break,
        }
    }
}

/// The reapers of all tiers, stopped together on shutdown.
pub struct ReaperSet {
    reapers: Vec<IdleReaper>,
}

impl ReaperSet {
    pub fn new(reapers: Vec<IdleReaper>) -> Self {
        Self { reapers }
    }

    pub fn len(&self) -> usize {
        self.reapers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reapers.is_empty()
    }

    /// Stop every reaper and wait for all of them to exit.
    pub async fn shutdown(self) {
        join_all(self.reapers.into_iter().map(IdleReaper::stop)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::LimiterPolicy;
    use std::time::Duration;

    fn registry(ttl_secs: u64, interval_secs: u64) -> Arc<LimiterRegistry> {
        Arc::new(LimiterRegistry::new(
            "reaper-test",
            LimiterPolicy::token_bucket(1.0, 1.0).unwrap(),
            Duration::from_secs(ttl_secs),
            Duration::from_secs(interval_secs),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_evicts_idle_entries() {
        let registry = registry(1, 1);
        registry.get_or_create("client");

        let reaper = IdleReaper::spawn(registry.clone());
        time::sleep(Duration::from_secs(3)).await;

        assert!(registry.is_empty());
        reaper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_keeps_active_entries() {
        let registry = registry(5, 1);
        registry.get_or_create("client");

        let reaper = IdleReaper::spawn(registry.clone());
        for _ in 0..10 {
            time::sleep(Duration::from_secs(1)).await;
            registry.get_or_create("client");
        }

        assert!(registry.contains("client"));
        reaper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_reaper_no_longer_sweeps() {
        let registry = registry(1, 1);
        let reaper = IdleReaper::spawn(registry.clone());

        reaper.stop().await;

        registry.get_or_create("client");
        time::sleep(Duration::from_secs(10)).await;
        assert!(registry.contains("client"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_set_shutdown_joins_all() {
        let reapers = (0..3)
            .map(|_| IdleReaper::spawn(registry(60, 60)))
            .collect::<Vec<_>>();
        let set = ReaperSet::new(reapers);
        assert_eq!(set.len(), 3);

        set.shutdown().await;
    }
}
