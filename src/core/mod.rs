//! Core components of the gatecrab rate limiting library
//!
//! This module contains the fundamental building blocks:
//! - [`key`]: Rate limit keys, identity derivation, and request context
//! - [`limiter`]: The fixed-window limiter policy and decision type
//! - [`registry`]: One limiter per scope over a single shared store

pub mod key;
pub mod limiter;
pub mod registry;

pub use key::{KeyStrategy, RateLimitKey, RequestContext};
pub use limiter::{Limiter, LimiterPolicy, RateLimitDecision};
pub use registry::LimiterRegistry;

use std::fmt;
use std::str::FromStr;

/// Named logical buckets of rate limiting
///
/// Each scope is an independent policy with its own window and threshold.
/// All scopes share one counter store; isolation comes from key
/// namespacing, so exhausting one scope never affects another.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Login and session endpoints
    Auth,
    /// Administrative endpoints
    Admin,
    /// Payment and payout endpoints
    Financial,
    /// Account creation
    Signup,
    /// Password reset requests
    PasswordReset,
    /// Token issuance and refresh
    Token,
    /// Other sensitive operations (2FA verification, email change)
    Sensitive,
    /// General API traffic
    Api,
    /// WebSocket upgrade requests
    #[serde(rename = "websocket")]
    WebSocket,
}

impl Scope {
    /// All scopes, in a stable order
    pub const ALL: [Scope; 9] = [
        Scope::Auth,
        Scope::Admin,
        Scope::Financial,
        Scope::Signup,
        Scope::PasswordReset,
        Scope::Token,
        Scope::Sensitive,
        Scope::Api,
        Scope::WebSocket,
    ];

    /// String form used in storage keys and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Auth => "auth",
            Scope::Admin => "admin",
            Scope::Financial => "financial",
            Scope::Signup => "signup",
            Scope::PasswordReset => "password_reset",
            Scope::Token => "token",
            Scope::Sensitive => "sensitive",
            Scope::Api => "api",
            Scope::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Scope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auth" => Ok(Scope::Auth),
            "admin" => Ok(Scope::Admin),
            "financial" => Ok(Scope::Financial),
            "signup" => Ok(Scope::Signup),
            "password_reset" | "password-reset" => Ok(Scope::PasswordReset),
            "token" => Ok(Scope::Token),
            "sensitive" => Ok(Scope::Sensitive),
            "api" => Ok(Scope::Api),
            "websocket" => Ok(Scope::WebSocket),
            _ => Err(anyhow::anyhow!(
                "Invalid scope: {}. Valid options are: auth, admin, financial, signup, \
                 password_reset, token, sensitive, api, websocket",
                s
            )),
        }
    }
}

/// Behavior when the counter store is unreachable
///
/// Failing closed on an auth endpoint during a store outage locks every
/// caller out; failing open drops abuse protection for the duration of
/// the outage. The choice is an explicit configuration decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Allow the request and log a warning
    Open,
    /// Deny the request with a structured 429
    Closed,
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(FailurePolicy::Open),
            "closed" => Ok(FailurePolicy::Closed),
            _ => Err(anyhow::anyhow!(
                "Invalid fail policy: {}. Valid options are: open, closed",
                s
            )),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Open => write!(f, "open"),
            FailurePolicy::Closed => write!(f, "closed"),
        }
    }
}

/// Malformed limiter configuration, fatal at process start
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// max_requests was zero
    #[error("scope {scope}: max_requests must be greater than zero")]
    ZeroLimit {
        /// The offending scope
        scope: Scope,
    },

    /// Window duration was zero
    #[error("scope {scope}: window must be greater than zero")]
    ZeroWindow {
        /// The offending scope
        scope: Scope,
    },
}
