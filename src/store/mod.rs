//! Counter store backends for rate limit state
//!
//! A [`CounterStore`] holds one fixed-window counter per key with
//! atomic increment-and-expire semantics. Two backends are provided:
//!
//! - [`MemoryStore`]: in-process map, valid for single-process
//!   deployments only
//! - [`RedisStore`]: remote counters shared by all processes, the
//!   durable multi-instance backend

mod memory;
mod redis;

pub use memory::{MemoryStore, MemoryStoreBuilder};
pub use redis::RedisStore;

use async_trait::async_trait;
use std::time::{Duration, SystemTime};

/// State of one counter window after an increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Requests observed in the current window, including this one
    pub count: u64,
    /// When the current window opened
    pub window_start: SystemTime,
}

/// Failures signaled by a counter store
///
/// Classification is by construction, never by inspecting error message
/// text: connection-level failures map to [`Unavailable`](StoreError::Unavailable)
/// and an elapsed operation deadline maps to [`Timeout`](StoreError::Timeout).
/// The limiter treats both according to its configured failure policy.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or the operation failed
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The operation did not complete within the configured deadline
    #[error("counter store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Storage of per-key counters with atomic increment-and-expire
///
/// Implementations must guarantee that [`increment`](CounterStore::increment)
/// is atomic under concurrent callers: no lost updates, and a request at
/// a window boundary is assigned wholly to one window. Counters expire
/// after a window of inactivity, either via native TTL (Redis) or lazy
/// expiry plus periodic sweeps (memory).
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter for `key`
    ///
    /// If no active window exists, or the previous window has expired,
    /// a fresh window is opened with a count of 1.
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: SystemTime,
    ) -> Result<WindowSnapshot, StoreError>;

    /// Clear the counter for `key`
    ///
    /// Used by tests and administrative overrides.
    async fn reset(&self, key: &str) -> Result<(), StoreError>;

    /// Verify the store is reachable
    async fn ping(&self) -> Result<(), StoreError>;
}
