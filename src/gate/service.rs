//! Admission gate: the request-facing decision function.

use http::{HeaderMap, StatusCode};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, trace};

use super::client::{ClientKey, ClientKeyResolver};
use crate::ratelimit::{PolicyTiers, Tier};

/// Machine-readable code carried by every rate-limit denial.
pub const RATE_LIMITED: &str = "rate_limited";

/// Outcome of an admission check.
///
/// A denial is an ordinary policy outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DenyReason {
    /// Tier that denied the request
    pub tier: Tier,
    /// Stable machine code
    pub code: &'static str,
    /// Human-readable explanation derived from the tier's policy
    pub message: String,
}

/// A rejection body for callers rendering a denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Numeric status code (429)
    pub code: u16,
    /// Human-readable message
    pub error: String,
    /// Stable machine code
    pub reason: &'static str,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    /// Status code a caller should respond with on denial.
    pub fn status(&self) -> StatusCode {
        match self {
            Decision::Allow => StatusCode::OK,
            Decision::Deny(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Body a caller can render for a denial; `None` when allowed.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Decision::Allow => None,
            Decision::Deny(reason) => Some(Rejection {
                code: StatusCode::TOO_MANY_REQUESTS.as_u16(),
                error: reason.message.clone(),
                reason: reason.code,
            }),
        }
    }
}

/// Decides whether a client may proceed on a given tier.
///
/// The gate never looks at which algorithm backs a tier; it only asks the
/// client's limiter for a yes or no.
#[derive(Clone)]
pub struct AdmissionGate {
    tiers: Arc<PolicyTiers>,
    resolver: ClientKeyResolver,
}

impl AdmissionGate {
    pub fn new(tiers: Arc<PolicyTiers>, resolver: ClientKeyResolver) -> Self {
        Self { tiers, resolver }
    }

    /// Check the admission of `key` on `tier`.
    pub fn check(&self, tier: Tier, key: &ClientKey) -> Decision {
        let registry = self.tiers.registry(tier);
        let limiter = registry.get_or_create(key.as_str());

        if limiter.allow() {
            trace!(tier = %tier, key = %key, "Request admitted");
            Decision::Allow
        } else {
            debug!(tier = %tier, key = %key, "Rate limit exceeded");
            Decision::Deny(DenyReason {
                tier,
                code: RATE_LIMITED,
                message: registry.policy().denial_message(),
            })
        }
    }

    /// Resolve the client key from request metadata and check it.
    pub fn check_request(
        &self,
        tier: Tier,
        headers: &HeaderMap,
        remote_addr: Option<SocketAddr>,
    ) -> Decision {
        let key = self.resolver.resolve(headers, remote_addr);
        self.check(tier, &key)
    }

    pub fn tiers(&self) -> &Arc<PolicyTiers> {
        &self.tiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Algorithm, RateLimitsConfig};
    use http::HeaderValue;
    use std::time::Duration;

    fn gate(config: &RateLimitsConfig) -> AdmissionGate {
        let tiers = PolicyTiers::from_config(config).unwrap();
        AdmissionGate::new(Arc::new(tiers), ClientKeyResolver::default())
    }

    fn tally(gate: &AdmissionGate, tier: Tier, key: &ClientKey, n: usize) -> (usize, usize) {
        let allowed = (0..n).filter(|_| gate.check(tier, key).is_allowed()).count();
        (allowed, n - allowed)
    }

    #[tokio::test(start_paused = true)]
    async fn test_general_tier_burst_scenario() {
        let gate = gate(&RateLimitsConfig::default());
        let key = ClientKey::from("203.0.113.7");

        assert_eq!(tally(&gate, Tier::General, &key, 25), (20, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_tier_login_scenario() {
        let gate = gate(&RateLimitsConfig::default());
        let key = ClientKey::from("203.0.113.7");

        assert_eq!(tally(&gate, Tier::Auth, &key, 4), (3, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_admits_exactly_one_more() {
        let gate = gate(&RateLimitsConfig::default());
        let key = ClientKey::from("203.0.113.7");

        tally(&gate, Tier::General, &key, 20);
        assert!(!gate.check(Tier::General, &key).is_allowed());

        // 10 requests/second: one token every 100ms
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(tally(&gate, Tier::General, &key, 2), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausting_one_key_leaves_others_alone() {
        let gate = gate(&RateLimitsConfig::default());
        let a = ClientKey::from("10.0.0.1");
        let b = ClientKey::from("10.0.0.2");

        tally(&gate, Tier::Upload, &a, 10);
        assert!(!gate.check(Tier::Upload, &a).is_allowed());

        assert_eq!(tally(&gate, Tier::Upload, &b, 2), (2, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_tier_behind_same_contract() {
        let mut config = RateLimitsConfig::default();
        config.auth.algorithm = Algorithm::SlidingWindow;
        config.auth.rate = 2.0;
        let gate = gate(&config);
        let key = ClientKey::from("203.0.113.7");

        assert_eq!(tally(&gate, Tier::Auth, &key, 3), (2, 1));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(gate.check(Tier::Auth, &key).is_allowed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_rejection_names_limit() {
        let mut config = RateLimitsConfig::default();
        config.upload.algorithm = Algorithm::SlidingWindow;
        config.upload.rate = 2.0;
        let gate = gate(&config);
        let key = ClientKey::from("203.0.113.7");

        tally(&gate, Tier::Upload, &key, 2);
        let rejection = gate.check(Tier::Upload, &key).rejection().unwrap();

        assert_eq!(rejection.code, 429);
        assert_eq!(rejection.error, "Too many requests, at most 2 allowed per 60s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deny_carries_reason_and_rejection() {
        let gate = gate(&RateLimitsConfig::default());
        let key = ClientKey::from("203.0.113.7");

        tally(&gate, Tier::Upload, &key, 2);
        let decision = gate.check(Tier::Upload, &key);

        assert_eq!(
            decision,
            Decision::Deny(DenyReason {
                tier: Tier::Upload,
                code: RATE_LIMITED,
                message: "Too many requests, please try again later".to_string(),
            })
        );
        assert_eq!(decision.status(), StatusCode::TOO_MANY_REQUESTS);

        let body = serde_json::to_value(decision.rejection().unwrap()).unwrap();
        assert_eq!(body["code"], 429);
        assert_eq!(body["reason"], "rate_limited");
        assert_eq!(body["error"], "Too many requests, please try again later");
        assert!(Decision::Allow.rejection().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_request_resolves_forwarded_client() {
        let gate = gate(&RateLimitsConfig::default());
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        let proxy: SocketAddr = "10.0.0.254:40000".parse().unwrap();

        for _ in 0..3 {
            assert!(gate.check_request(Tier::Auth, &headers, Some(proxy)).is_allowed());
        }
        assert!(!gate.check_request(Tier::Auth, &headers, Some(proxy)).is_allowed());

        // The proxy itself is a different client.
        assert!(gate.check_request(Tier::Auth, &HeaderMap::new(), Some(proxy)).is_allowed());
        assert!(gate.tiers().registry(Tier::Auth).contains("203.0.113.7"));
        assert!(gate.tiers().registry(Tier::Auth).contains("10.0.0.254"));
    }
}
