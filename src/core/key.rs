//! Rate limit keys and caller identity derivation
//!
//! A [`RateLimitKey`] is the composite of a [`Scope`] and a caller
//! identity string. One counter exists per (scope, identity, window).
//! The storage key is prefixed with the scope so that every scope gets
//! an independent namespace on the shared store.

use super::Scope;
use std::net::IpAddr;

/// Identity bucket used when no IP or user id could be derived
///
/// Intentionally coarse: all unidentifiable callers share one counter,
/// which still provides some protection against floods of anonymous
/// requests.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Minimal request view the limiter operates on
///
/// Deliberately decoupled from any web framework's request type. The
/// middleware adapter builds one of these from the inbound HTTP request;
/// tests construct them directly.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Caller IP, typically taken from forwarding headers or the peer address
    pub source_ip: Option<IpAddr>,
    /// Authenticated user id attached by upstream auth middleware, if any
    pub user_id: Option<String>,
    /// Request path
    pub path: String,
    /// Request method
    pub method: String,
}

impl RequestContext {
    /// Build a context for an anonymous caller identified only by IP
    pub fn from_ip(ip: IpAddr) -> Self {
        RequestContext {
            source_ip: Some(ip),
            user_id: None,
            path: String::new(),
            method: String::new(),
        }
    }
}

/// How a caller identity is derived from a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Bucket by source IP only
    SourceIp,
    /// Bucket by authenticated user id only
    UserId,
    /// Bucket by user id when authenticated, falling back to source IP
    UserOrIp,
    /// Bucket by source IP and request path, for route-specific limits
    IpAndPath,
}

impl KeyStrategy {
    /// Derive the identity string for a request
    ///
    /// Falls back to [`UNKNOWN_IDENTITY`] when the strategy's inputs are
    /// missing, so unidentifiable callers share a single coarse bucket
    /// rather than bypassing the limiter.
    pub fn identity(&self, ctx: &RequestContext) -> String {
        match self {
            KeyStrategy::SourceIp => match ctx.source_ip {
                Some(ip) => format!("ip:{ip}"),
                None => UNKNOWN_IDENTITY.to_string(),
            },
            KeyStrategy::UserId => match &ctx.user_id {
                Some(user) if !user.is_empty() => format!("user:{user}"),
                _ => UNKNOWN_IDENTITY.to_string(),
            },
            KeyStrategy::UserOrIp => match (&ctx.user_id, ctx.source_ip) {
                (Some(user), _) if !user.is_empty() => format!("user:{user}"),
                (_, Some(ip)) => format!("ip:{ip}"),
                _ => UNKNOWN_IDENTITY.to_string(),
            },
            KeyStrategy::IpAndPath => match ctx.source_ip {
                Some(ip) => format!("ip:{ip}:{}", ctx.path),
                None => format!("{UNKNOWN_IDENTITY}:{}", ctx.path),
            },
        }
    }
}

/// Composite key identifying one counter on the store
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct RateLimitKey {
    /// The limiter instance this key belongs to
    pub scope: Scope,
    /// Caller identity within the scope
    pub identity: String,
}

impl RateLimitKey {
    /// Create a key from a scope and a pre-derived identity
    pub fn new(scope: Scope, identity: impl Into<String>) -> Self {
        RateLimitKey {
            scope,
            identity: identity.into(),
        }
    }

    /// The namespaced key string written to the counter store
    ///
    /// Scope isolation relies on this prefix: two scopes with the same
    /// identity map to distinct storage keys on the shared backend.
    pub fn storage_key(&self) -> String {
        format!("gatecrab:{}:{}", self.scope.as_str(), self.identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn ctx(ip: Option<IpAddr>, user: Option<&str>) -> RequestContext {
        RequestContext {
            source_ip: ip,
            user_id: user.map(str::to_string),
            path: "/v1/bookings".to_string(),
            method: "POST".to_string(),
        }
    }

    fn some_ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, 7))
    }

    #[test]
    fn source_ip_strategy_uses_ip() {
        let identity = KeyStrategy::SourceIp.identity(&ctx(Some(some_ip()), Some("u1")));
        assert_eq!(identity, "ip:192.168.1.7");
    }

    #[test]
    fn missing_ip_falls_back_to_unknown_bucket() {
        let identity = KeyStrategy::SourceIp.identity(&ctx(None, None));
        assert_eq!(identity, UNKNOWN_IDENTITY);
    }

    #[test]
    fn user_or_ip_prefers_user() {
        let strategy = KeyStrategy::UserOrIp;
        assert_eq!(
            strategy.identity(&ctx(Some(some_ip()), Some("u1"))),
            "user:u1"
        );
        assert_eq!(strategy.identity(&ctx(Some(some_ip()), None)), "ip:192.168.1.7");
        assert_eq!(strategy.identity(&ctx(None, None)), UNKNOWN_IDENTITY);
    }

    #[test]
    fn empty_user_id_is_treated_as_missing() {
        let identity = KeyStrategy::UserId.identity(&ctx(Some(some_ip()), Some("")));
        assert_eq!(identity, UNKNOWN_IDENTITY);
    }

    #[test]
    fn ip_and_path_strategy_includes_route() {
        let identity = KeyStrategy::IpAndPath.identity(&ctx(Some(some_ip()), None));
        assert_eq!(identity, "ip:192.168.1.7:/v1/bookings");
    }

    #[test]
    fn storage_key_is_scope_namespaced() {
        let key = RateLimitKey::new(Scope::Auth, "ip:10.0.0.1");
        assert_eq!(key.storage_key(), "gatecrab:auth:ip:10.0.0.1");

        let same_identity = RateLimitKey::new(Scope::Admin, "ip:10.0.0.1");
        assert_ne!(key.storage_key(), same_identity.storage_key());
    }
}
