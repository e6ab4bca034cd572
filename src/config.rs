//! Configuration management for Tollgate.
//!
//! Configuration is read once at startup. The three rate-limit tiers carry the
//! defaults the service historically shipped with; any of them can be
//! overridden from a YAML file or from `TOLLGATE__*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TollgateError};

/// Environment variable prefix for layered configuration.
const ENV_PREFIX: &str = "TOLLGATE";
/// Separator between nested keys in environment variable names.
const ENV_SEPARATOR: &str = "__";

/// Main configuration for the Tollgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TollgateConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Client identity resolution
    #[serde(default)]
    pub client_key: ClientKeyConfig,

    /// Per-tier rate limiting configuration
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// How client keys are derived from requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientKeyConfig {
    /// Honor `X-Forwarded-For` / `X-Real-IP`. Disable when not behind a proxy
    /// that overwrites them.
    #[serde(default = "default_trust_forwarded")]
    pub trust_forwarded_headers: bool,
}

impl Default for ClientKeyConfig {
    fn default() -> Self {
        Self {
            trust_forwarded_headers: default_trust_forwarded(),
        }
    }
}

fn default_trust_forwarded() -> bool {
    true
}

/// Configuration of the three admission tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    /// General API traffic
    #[serde(default = "default_general_tier")]
    pub general: TierConfig,

    /// Login, registration and password reset
    #[serde(default = "default_auth_tier")]
    pub auth: TierConfig,

    /// File uploads
    #[serde(default = "default_upload_tier")]
    pub upload: TierConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            general: default_general_tier(),
            auth: default_auth_tier(),
            upload: default_upload_tier(),
        }
    }
}

fn default_general_tier() -> TierConfig {
    TierConfig {
        algorithm: Algorithm::TokenBucket,
        rate: 10.0,
        unit: TimeUnit::Second,
        burst: 20,
        cleanup_interval_secs: 30 * 60,
        idle_ttl_secs: None,
    }
}

fn default_auth_tier() -> TierConfig {
    TierConfig {
        algorithm: Algorithm::TokenBucket,
        rate: 5.0,
        unit: TimeUnit::Minute,
        burst: 3,
        cleanup_interval_secs: 60 * 60,
        idle_ttl_secs: None,
    }
}

fn default_upload_tier() -> TierConfig {
    TierConfig {
        algorithm: Algorithm::TokenBucket,
        rate: 3.0,
        unit: TimeUnit::Minute,
        burst: 2,
        cleanup_interval_secs: 60 * 60,
        idle_ttl_secs: None,
    }
}

/// Parameters for a single tier.
///
/// For the token bucket, `rate` per `unit` is the refill rate and `burst` the
/// bucket capacity. For the sliding window, `ceil(rate)` requests are admitted
/// per trailing `unit` and `burst` is ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Limiter algorithm backing the tier
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Requests admitted per `unit`
    pub rate: f64,

    /// Time unit `rate` is expressed in
    #[serde(default)]
    pub unit: TimeUnit,

    /// Maximum instantaneous burst
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// How often the idle reaper sweeps this tier
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,

    /// How long a client may stay silent before its state is dropped.
    /// Defaults to the cleanup interval.
    #[serde(default)]
    pub idle_ttl_secs: Option<u64>,
}

fn default_burst() -> u32 {
    1
}

fn default_cleanup_interval() -> u64 {
    30 * 60
}

impl TierConfig {
    /// Sustained rate in requests per second.
    pub fn rate_per_second(&self) -> f64 {
        self.rate / self.unit.duration().as_secs_f64()
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs.unwrap_or(self.cleanup_interval_secs))
    }
}

/// Admission algorithm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    #[default]
    TokenBucket,
    SlidingWindow,
}

/// Time unit for configured rates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    #[default]
    Second,
    Minute,
    Hour,
}

impl TimeUnit {
    /// Get the duration of this time unit.
    pub fn duration(&self) -> Duration {
        match self {
            TimeUnit::Second => Duration::from_secs(1),
            TimeUnit::Minute => Duration::from_secs(60),
            TimeUnit::Hour => Duration::from_secs(3600),
        }
    }
}

impl TollgateConfig {
    /// Load configuration from a YAML file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration file");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TollgateError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load layered configuration: built-in defaults, then the optional YAML
    /// file, then `TOLLGATE__*` environment variables
    /// (e.g. `TOLLGATE__RATE_LIMITS__AUTH__BURST=5`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
