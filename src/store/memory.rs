//! In-memory counter store for single-process deployments
//!
//! Windows are expired lazily on access and swept at a fixed interval,
//! so memory stays bounded without a background task. All mutation
//! happens under one async mutex, which makes the increment atomic
//! within the process.
//!
//! This store provides no cross-process consistency: two service
//! instances using their own `MemoryStore` enforce their limits
//! independently. Use [`RedisStore`](super::RedisStore) for multi-process
//! deployments.

use super::{CounterStore, StoreError, WindowSnapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

// Configuration constants
const DEFAULT_CAPACITY: usize = 1000;
const CAPACITY_OVERHEAD_FACTOR: f64 = 1.3;
const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300;

/// State for a single counter window
#[derive(Debug, Clone, Copy)]
struct Window {
    count: u64,
    started: SystemTime,
    /// Window length recorded at creation, used for expiry checks
    duration: Duration,
}

impl Window {
    fn expired(&self, now: SystemTime) -> bool {
        match now.duration_since(self.started) {
            Ok(elapsed) => elapsed >= self.duration,
            // Clock went backwards relative to the window start
            Err(_) => false,
        }
    }
}

struct Inner {
    windows: HashMap<String, Window>,
    next_cleanup: SystemTime,
}

/// In-memory fixed-window counter store
///
/// # Example
///
/// ```
/// use gatecrab::store::MemoryStore;
/// use std::time::Duration;
///
/// let store = MemoryStore::builder()
///     .capacity(10_000)
///     .cleanup_interval(Duration::from_secs(120))
///     .build();
/// ```
pub struct MemoryStore {
    inner: Mutex<Inner>,
    cleanup_interval: Duration,
}

/// Builder for configuring a [`MemoryStore`]
pub struct MemoryStoreBuilder {
    capacity: usize,
    cleanup_interval: Duration,
}

impl MemoryStoreBuilder {
    /// Expected number of unique keys to track
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// How often expired windows are swept from the map
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Build the store
    pub fn build(self) -> MemoryStore {
        MemoryStore {
            inner: Mutex::new(Inner {
                // Pre-allocate with overhead to avoid rehashing
                windows: HashMap::with_capacity(
                    (self.capacity as f64 * CAPACITY_OVERHEAD_FACTOR) as usize,
                ),
                next_cleanup: SystemTime::now() + self.cleanup_interval,
            }),
            cleanup_interval: self.cleanup_interval,
        }
    }
}

impl MemoryStore {
    /// Create a store with default capacity and cleanup interval
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for configuring a `MemoryStore`
    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder {
            capacity: DEFAULT_CAPACITY,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }

    /// Number of tracked windows, expired entries included
    pub async fn len(&self) -> usize {
        self.inner.lock().await.windows.len()
    }

    /// Whether the store currently tracks no windows
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.windows.is_empty()
    }

    fn sweep_if_due(&self, inner: &mut Inner, now: SystemTime) {
        if now < inner.next_cleanup {
            return;
        }
        inner.windows.retain(|_, window| !window.expired(now));
        inner.next_cleanup = now + self.cleanup_interval;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: SystemTime,
    ) -> Result<WindowSnapshot, StoreError> {
        let mut inner = self.inner.lock().await;
        self.sweep_if_due(&mut inner, now);

        let entry = inner.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            started: now,
            duration: window,
        });

        if entry.expired(now) {
            entry.count = 0;
            entry.started = now;
            entry.duration = window;
        }

        entry.count += 1;

        Ok(WindowSnapshot {
            count: entry.count,
            window_start: entry.started,
        })
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.windows.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn first_increment_opens_a_window() {
        let store = MemoryStore::new();
        let now = SystemTime::now();

        let snap = store.increment("k", WINDOW, now).await.unwrap();
        assert_eq!(snap.count, 1);
        assert_eq!(snap.window_start, now);
    }

    #[tokio::test]
    async fn increments_accumulate_within_window() {
        let store = MemoryStore::new();
        let now = SystemTime::now();

        for expected in 1..=5 {
            let snap = store
                .increment("k", WINDOW, now + Duration::from_millis(expected))
                .await
                .unwrap();
            assert_eq!(snap.count, expected);
        }
    }

    #[tokio::test]
    async fn expired_window_restarts_at_one() {
        let store = MemoryStore::new();
        let start = SystemTime::now();

        for _ in 0..7 {
            store.increment("k", WINDOW, start).await.unwrap();
        }

        // One millisecond past the window boundary
        let later = start + WINDOW + Duration::from_millis(1);
        let snap = store.increment("k", WINDOW, later).await.unwrap();
        assert_eq!(snap.count, 1);
        assert_eq!(snap.window_start, later);
    }

    #[tokio::test]
    async fn request_at_exact_boundary_starts_new_window() {
        let store = MemoryStore::new();
        let start = SystemTime::now();

        store.increment("k", WINDOW, start).await.unwrap();

        let snap = store.increment("k", WINDOW, start + WINDOW).await.unwrap();
        assert_eq!(snap.count, 1);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = MemoryStore::new();
        let now = SystemTime::now();

        store.increment("a", WINDOW, now).await.unwrap();
        store.increment("a", WINDOW, now).await.unwrap();
        let snap = store.increment("b", WINDOW, now).await.unwrap();
        assert_eq!(snap.count, 1);
    }

    #[tokio::test]
    async fn reset_clears_the_counter() {
        let store = MemoryStore::new();
        let now = SystemTime::now();

        store.increment("k", WINDOW, now).await.unwrap();
        store.increment("k", WINDOW, now).await.unwrap();
        store.reset("k").await.unwrap();

        let snap = store.increment("k", WINDOW, now).await.unwrap();
        assert_eq!(snap.count, 1);
    }

    #[tokio::test]
    async fn sweep_removes_expired_windows() {
        let store = MemoryStore::builder()
            .cleanup_interval(Duration::from_secs(10))
            .build();
        let start = SystemTime::now();

        store.increment("stale", WINDOW, start).await.unwrap();
        assert_eq!(store.len().await, 1);

        // Past both the window and the cleanup interval; touching a
        // different key triggers the sweep.
        let later = start + WINDOW + Duration::from_secs(11);
        store.increment("fresh", WINDOW, later).await.unwrap();

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn ping_always_succeeds() {
        let store = MemoryStore::new();
        assert!(store.ping().await.is_ok());
    }
}
