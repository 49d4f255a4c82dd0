//! One limiter per scope over a single shared store
//!
//! The registry is the process-wide home of all limiter instances.
//! Every scope gets its own policy, but all of them share one
//! [`CounterStore`] and one [`Metrics`] instance; isolation between
//! scopes comes from key namespacing, not separate stores.

use super::key::KeyStrategy;
use super::limiter::{Limiter, LimiterPolicy};
use super::{ConfigError, FailurePolicy, Scope};
use crate::metrics::Metrics;
use crate::store::CounterStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Registry of limiters, keyed by scope
pub struct LimiterRegistry {
    limiters: HashMap<Scope, Arc<Limiter>>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("scopes", &self.limiters.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Builder assembling a registry from per-scope policies
pub struct LimiterRegistryBuilder {
    store: Arc<dyn CounterStore>,
    failure_policy: FailurePolicy,
    policies: Vec<LimiterPolicy>,
}

impl LimiterRegistryBuilder {
    /// Add a scope with an explicit limit and window
    ///
    /// Auth-adjacent scopes bucket by source IP (the caller is not
    /// authenticated yet); everything else buckets by user id with an
    /// IP fallback.
    pub fn scope(mut self, scope: Scope, max_requests: u64, window: Duration) -> Self {
        let strategy = match scope {
            Scope::Auth | Scope::Signup | Scope::PasswordReset => KeyStrategy::SourceIp,
            _ => KeyStrategy::UserOrIp,
        };
        self.policies.push(
            LimiterPolicy::new(scope, max_requests, window)
                .with_key_strategy(strategy)
                .with_failure_policy(self.failure_policy),
        );
        self
    }

    /// Add a scope with a fully specified policy
    pub fn policy(mut self, policy: LimiterPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Validate every policy and build the registry
    pub fn build(self) -> Result<LimiterRegistry, ConfigError> {
        let metrics = Arc::new(Metrics::new());
        let mut limiters = HashMap::with_capacity(self.policies.len());

        for policy in self.policies {
            let scope = policy.scope;
            let limiter =
                Limiter::new(policy, self.store.clone())?.with_metrics(metrics.clone());
            limiters.insert(scope, Arc::new(limiter));
        }

        Ok(LimiterRegistry { limiters, metrics })
    }
}

impl LimiterRegistry {
    /// Start building a registry over a shared store
    pub fn builder(
        store: Arc<dyn CounterStore>,
        failure_policy: FailurePolicy,
    ) -> LimiterRegistryBuilder {
        LimiterRegistryBuilder {
            store,
            failure_policy,
            policies: Vec::new(),
        }
    }

    /// The limiter for a scope, if one was configured
    pub fn get(&self, scope: Scope) -> Option<Arc<Limiter>> {
        self.limiters.get(&scope).cloned()
    }

    /// Metrics shared by every limiter in this registry
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Scopes present in this registry
    pub fn scopes(&self) -> impl Iterator<Item = Scope> + '_ {
        self.limiters.keys().copied()
    }
}
