//! Client identity resolution.

use http::HeaderMap;
use std::fmt;
use std::net::SocketAddr;
use tracing::trace;

use crate::config::ClientKeyConfig;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Key used when a request carries no usable identity at all.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// The identity a request is rate limited under.
///
/// Not globally unique (clients behind one NAT share a key), but it is the
/// unit of isolation between callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClientKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ClientKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ClientKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Derives a [`ClientKey`] from request headers and the peer address.
///
/// Selection order: the first hop of `X-Forwarded-For`, then `X-Real-IP`,
/// then the transport peer's IP. Forwarded headers are skipped entirely when
/// they are not trusted.
#[derive(Debug, Clone)]
pub struct ClientKeyResolver {
    trust_forwarded_headers: bool,
}

impl ClientKeyResolver {
    pub fn new(config: &ClientKeyConfig) -> Self {
        Self {
            trust_forwarded_headers: config.trust_forwarded_headers,
        }
    }

    /// Resolve the key for a request.
    pub fn resolve(&self, headers: &HeaderMap, remote_addr: Option<SocketAddr>) -> ClientKey {
        if self.trust_forwarded_headers {
            if let Some(forwarded) = header_str(headers, X_FORWARDED_FOR)
                .and_then(|value| value.split(',').map(str::trim).find(|hop| !hop.is_empty()))
            {
                trace!(client = %forwarded, "Client key from X-Forwarded-For");
                return ClientKey::from(forwarded);
            }

            if let Some(real_ip) = header_str(headers, X_REAL_IP) {
                trace!(client = %real_ip, "Client key from X-Real-IP");
                return ClientKey::from(real_ip);
            }
        }

        match remote_addr {
            Some(addr) => ClientKey::new(addr.ip().to_string()),
            None => ClientKey::from(UNKNOWN_CLIENT),
        }
    }
}

impl Default for ClientKeyResolver {
    fn default() -> Self {
        Self::new(&ClientKeyConfig::default())
    }
}

/// A header's value as trimmed, non-empty text.
fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
