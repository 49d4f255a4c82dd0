//! Fixed-window limiter policy
//!
//! A [`Limiter`] binds one immutable [`LimiterPolicy`] to a shared
//! [`CounterStore`] and turns window counts into allow/deny decisions.
//! The check never returns an error to the caller: quota exhaustion is a
//! normal denied decision, and store failures are resolved through the
//! policy's [`FailurePolicy`].

use super::key::{KeyStrategy, RateLimitKey, RequestContext};
use super::{ConfigError, FailurePolicy, Scope};
use crate::metrics::Metrics;
use crate::store::CounterStore;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Immutable configuration for one limiter instance
///
/// Created at process start and validated before use; zero windows or
/// thresholds are a fatal configuration error, never a per-request one.
#[derive(Debug, Clone)]
pub struct LimiterPolicy {
    /// The scope this limiter enforces
    pub scope: Scope,
    /// Maximum requests allowed per window
    pub max_requests: u64,
    /// Window duration
    pub window: Duration,
    /// How caller identities are derived
    pub key_strategy: KeyStrategy,
    /// Behavior when the counter store is unreachable
    pub failure_policy: FailurePolicy,
}

impl LimiterPolicy {
    /// Create a policy with the default identity strategy (user id,
    /// falling back to source IP) and fail-open behavior
    pub fn new(scope: Scope, max_requests: u64, window: Duration) -> Self {
        LimiterPolicy {
            scope,
            max_requests,
            window,
            key_strategy: KeyStrategy::UserOrIp,
            failure_policy: FailurePolicy::Open,
        }
    }

    /// Set the identity derivation strategy
    pub fn with_key_strategy(mut self, strategy: KeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    /// Set the store-failure policy
    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Reject zero windows and thresholds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::ZeroLimit { scope: self.scope });
        }
        if self.window.is_zero() {
            return Err(ConfigError::ZeroWindow { scope: self.scope });
        }
        Ok(())
    }
}

/// Outcome of a rate limit check
///
/// Produced fresh per request and never persisted.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Maximum requests allowed per window
    pub limit: u64,
    /// Requests remaining in the current window
    pub remaining: u64,
    /// When the current window resets
    #[serde(with = "unix_seconds")]
    pub reset_at: SystemTime,
    /// How long to wait before retrying; present only when denied and
    /// always positive
    #[serde(serialize_with = "opt_duration_secs")]
    pub retry_after: Option<Duration>,
}

mod unix_seconds {
    use serde::Serializer;
    use std::time::{SystemTime, UNIX_EPOCH};

    pub fn serialize<S: Serializer>(t: &SystemTime, s: S) -> Result<S::Ok, S::Error> {
        let secs = t
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        s.serialize_u64(secs)
    }
}

fn opt_duration_secs<S: serde::Serializer>(
    d: &Option<Duration>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&d.as_secs_f64()),
        None => s.serialize_none(),
    }
}

/// A limiter policy bound to a counter store
pub struct Limiter {
    policy: LimiterPolicy,
    store: Arc<dyn CounterStore>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for Limiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Limiter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Limiter {
    /// Bind a validated policy to a store
    pub fn new(policy: LimiterPolicy, store: Arc<dyn CounterStore>) -> Result<Self, ConfigError> {
        policy.validate()?;
        Ok(Limiter {
            policy,
            store,
            metrics: Arc::new(Metrics::new()),
        })
    }

    /// Share a metrics registry with other limiters
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// The policy this limiter enforces
    pub fn policy(&self) -> &LimiterPolicy {
        &self.policy
    }

    /// Check a request against the limit, consuming one slot if allowed
    pub async fn check(&self, ctx: &RequestContext) -> RateLimitDecision {
        self.check_at(ctx, SystemTime::now()).await
    }

    /// Check a request at an explicit point in time
    ///
    /// Used by tests to exercise window boundaries deterministically.
    pub async fn check_at(&self, ctx: &RequestContext, now: SystemTime) -> RateLimitDecision {
        let key = RateLimitKey::new(self.policy.scope, self.policy.key_strategy.identity(ctx));
        self.check_key_at(&key, now).await
    }

    /// Check a pre-built key, bypassing identity derivation
    pub async fn check_key_at(&self, key: &RateLimitKey, now: SystemTime) -> RateLimitDecision {
        self.metrics.record_check();

        let snapshot = self
            .store
            .increment(&key.storage_key(), self.policy.window, now)
            .await;

        match snapshot {
            Ok(snap) => {
                let limit = self.policy.max_requests;
                let allowed = snap.count <= limit;
                let remaining = limit.saturating_sub(snap.count);
                let reset_at = snap.window_start + self.policy.window;
                let retry_after = if allowed {
                    None
                } else {
                    // Denied results always carry a positive retry hint,
                    // even at the tail end of the window.
                    Some(
                        reset_at
                            .duration_since(now)
                            .unwrap_or(Duration::ZERO)
                            .max(Duration::from_millis(1)),
                    )
                };

                self.metrics.record_decision(allowed);
                if !allowed {
                    tracing::debug!(
                        scope = %key.scope,
                        identity = %key.identity,
                        limit,
                        "rate limit exceeded"
                    );
                }

                RateLimitDecision {
                    allowed,
                    limit,
                    remaining,
                    reset_at,
                    retry_after,
                }
            }
            Err(e) => {
                self.metrics.record_store_error();
                match self.policy.failure_policy {
                    FailurePolicy::Open => {
                        tracing::warn!(
                            scope = %key.scope,
                            error = %e,
                            "counter store unavailable, failing open"
                        );
                        self.metrics.record_fail_open();
                        RateLimitDecision {
                            allowed: true,
                            limit: self.policy.max_requests,
                            remaining: self.policy.max_requests,
                            reset_at: now + self.policy.window,
                            retry_after: None,
                        }
                    }
                    FailurePolicy::Closed => {
                        tracing::warn!(
                            scope = %key.scope,
                            error = %e,
                            "counter store unavailable, failing closed"
                        );
                        self.metrics.record_fail_closed();
                        RateLimitDecision {
                            allowed: false,
                            limit: self.policy.max_requests,
                            remaining: 0,
                            reset_at: now + self.policy.window,
                            retry_after: Some(self.policy.window),
                        }
                    }
                }
            }
        }
    }

    /// Clear the counter for one caller (administrative override)
    pub async fn reset(&self, ctx: &RequestContext) -> Result<(), crate::store::StoreError> {
        let key = RateLimitKey::new(self.policy.scope, self.policy.key_strategy.identity(ctx));
        self.store.reset(&key.storage_key()).await
    }
}
