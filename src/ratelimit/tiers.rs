//! Policy tiers built from configuration.
//!
//! The three tiers are constructed once, before the service takes traffic,
//! and handed to the request path by reference. A tier with invalid
//! parameters fails startup instead of degrading to unlimited or always-deny.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use super::backend::LimiterPolicy;
use super::reaper::{IdleReaper, ReaperSet};
use super::registry::LimiterRegistry;
use crate::config::{Algorithm, RateLimitsConfig, TierConfig};
use crate::error::{Result, TollgateError};

/// A class of endpoints with its own admission policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// General API traffic
    General,
    /// Authentication endpoints
    Auth,
    /// Upload endpoints
    Upload,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::General, Tier::Auth, Tier::Upload];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::General => "general",
            Tier::Auth => "auth",
            Tier::Upload => "upload",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = TollgateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Tier::General),
            "auth" => Ok(Tier::Auth),
            "upload" => Ok(Tier::Upload),
            other => Err(TollgateError::Config(format!("unknown tier '{}'", other))),
        }
    }
}

/// The registries of all tiers.
pub struct PolicyTiers {
    general: Arc<LimiterRegistry>,
    auth: Arc<LimiterRegistry>,
    upload: Arc<LimiterRegistry>,
}

impl PolicyTiers {
    /// Validate the configuration and build one registry per tier.
    pub fn from_config(config: &RateLimitsConfig) -> Result<Self> {
        let tiers = Self {
            general: Arc::new(build_registry(Tier::General, &config.general)?),
            auth: Arc::new(build_registry(Tier::Auth, &config.auth)?),
            upload: Arc::new(build_registry(Tier::Upload, &config.upload)?),
        };

        for tier in Tier::ALL {
            let registry = tiers.registry(tier);
            info!(
                tier = %tier,
                policy = ?registry.policy(),
                idle_ttl = ?registry.idle_ttl(),
                cleanup_interval = ?registry.cleanup_interval(),
                "Tier initialized"
            );
        }

        Ok(tiers)
    }

    /// Get the registry backing `tier`.
    pub fn registry(&self, tier: Tier) -> &Arc<LimiterRegistry> {
        match tier {
            Tier::General => &self.general,
            Tier::Auth => &self.auth,
            Tier::Upload => &self.upload,
        }
    }

    /// Spawn one idle reaper per tier on the current tokio runtime.
    pub fn start_reapers(&self) -> ReaperSet {
        ReaperSet::new(
            Tier::ALL
                .iter()
                .map(|tier| IdleReaper::spawn(self.registry(*tier).clone()))
                .collect(),
        )
    }

    /// Summaries of every tier, for operator output.
    pub fn summaries(&self) -> Vec<TierSummary> {
        Tier::ALL
            .iter()
            .map(|tier| TierSummary::new(*tier, self.registry(*tier)))
            .collect()
    }
}

fn build_registry(tier: Tier, config: &TierConfig) -> Result<LimiterRegistry> {
    let policy = policy_for(config).map_err(|e| match e {
        TollgateError::InvalidPolicy { reason, .. } => {
            TollgateError::invalid_policy(tier.as_str(), reason)
        }
        other => other,
    })?;

    if config.cleanup_interval_secs == 0 {
        return Err(TollgateError::invalid_policy(
            tier.as_str(),
            "cleanup interval must be positive",
        ));
    }
    if config.idle_ttl_secs == Some(0) {
        return Err(TollgateError::invalid_policy(
            tier.as_str(),
            "idle TTL must be positive",
        ));
    }

    Ok(LimiterRegistry::new(
        tier.as_str(),
        policy,
        config.idle_ttl(),
        config.cleanup_interval(),
    ))
}

fn policy_for(config: &TierConfig) -> Result<LimiterPolicy> {
    match config.algorithm {
        Algorithm::TokenBucket => {
            LimiterPolicy::token_bucket(f64::from(config.burst), config.rate_per_second())
        }
        Algorithm::SlidingWindow => {
            if !(config.rate.is_finite() && config.rate > 0.0) {
                return Err(TollgateError::invalid_policy(
                    "sliding_window",
                    format!("rate must be positive, got {}", config.rate),
                ));
            }
            LimiterPolicy::sliding_window(config.rate.ceil() as usize, config.unit.duration())
        }
    }
}

/// Resolved parameters of one tier.
#[derive(Debug, Clone, Serialize)]
pub struct TierSummary {
    pub tier: Tier,
    pub algorithm: Algorithm,
    /// Token bucket capacity or sliding window count
    pub limit: f64,
    /// Token bucket refill rate, or `limit` spread over the window
    pub per_second: f64,
    pub idle_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    pub tracked_clients: usize,
}

impl TierSummary {
    fn new(tier: Tier, registry: &LimiterRegistry) -> Self {
        let (algorithm, limit, per_second) = match *registry.policy() {
            LimiterPolicy::TokenBucket {
                capacity,
                refill_per_sec,
            } => (Algorithm::TokenBucket, capacity, refill_per_sec),
            LimiterPolicy::SlidingWindow { max_count, window } => (
                Algorithm::SlidingWindow,
                max_count as f64,
                max_count as f64 / window.as_secs_f64(),
            ),
        };

        Self {
            tier,
            algorithm,
            limit,
            per_second,
            idle_ttl_secs: registry.idle_ttl().as_secs(),
            cleanup_interval_secs: registry.cleanup_interval().as_secs(),
            tracked_clients: registry.len(),
        }
    }
}
