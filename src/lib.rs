//! # Gatecrab
//!
//! A scoped rate-limiting library with pluggable counter stores and an
//! HTTP middleware adapter.
//!
//! ## Purpose
//!
//! Web backends need different limits on different kinds of traffic:
//! login attempts, signups, password resets, payments, general API
//! calls. Gatecrab gives each of these a named [`Scope`](core::Scope)
//! with its own window and threshold, all enforced over a single
//! counter store so that scopes stay isolated by key namespacing rather
//! than by running separate backends.
//!
//! ## Layers
//!
//! - [`store`]: counter stores with atomic increment-and-expire —
//!   [`MemoryStore`](store::MemoryStore) for a single process,
//!   [`RedisStore`](store::RedisStore) for shared state across
//!   processes
//! - [`core`]: the fixed-window [`Limiter`](core::Limiter) policy and
//!   the per-scope [`LimiterRegistry`](core::LimiterRegistry)
//! - [`middleware`]: axum/tower adapters that short-circuit denied
//!   requests with a structured 429
//!
//! ## Quick Start
//!
//! ```
//! use gatecrab::core::{Limiter, LimiterPolicy, RequestContext, Scope};
//! use gatecrab::store::MemoryStore;
//! use std::net::{IpAddr, Ipv4Addr};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let limiter = Limiter::new(
//!     LimiterPolicy::new(Scope::Auth, 10, Duration::from_secs(60)),
//!     Arc::new(MemoryStore::new()),
//! )
//! .unwrap();
//!
//! let ctx = RequestContext::from_ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
//! let decision = limiter.check(&ctx).await;
//! assert!(decision.allowed);
//! assert_eq!(decision.remaining, 9);
//! # }
//! ```
//!
//! ## Store failures
//!
//! When the counter store is unreachable, each limiter applies its
//! configured [`FailurePolicy`](core::FailurePolicy): fail open (allow
//! and log a warning) or fail closed (deny). Quota exhaustion and store
//! outages never surface as errors to the request path.

pub mod config;
pub mod core;
pub mod metrics;
pub mod middleware;
pub mod store;

pub use crate::core::{
    FailurePolicy, KeyStrategy, Limiter, LimiterPolicy, LimiterRegistry, RateLimitDecision,
    RateLimitKey, RequestContext, Scope,
};
pub use crate::middleware::{RateLimitLayer, apply_rate_limit, rate_limit_middleware};
pub use crate::store::{CounterStore, MemoryStore, RedisStore, StoreError, WindowSnapshot};
