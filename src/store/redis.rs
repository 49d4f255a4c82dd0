//! Redis-backed counter store for multi-process deployments
//!
//! Counters live in Redis so every service instance sees the same
//! window state. The increment is a single Lua script evaluation
//! (INCR + PEXPIRE + PTTL), which makes it atomic across processes:
//! concurrent callers cannot lose updates, and a request arriving at a
//! window boundary is assigned wholly to the window the script observes.
//!
//! Every operation runs under an explicit deadline. A connection-level
//! failure maps to [`StoreError::Unavailable`] and an elapsed deadline
//! to [`StoreError::Timeout`]; the limiter's failure policy decides what
//! happens next. Stale state self-heals through the key TTL.

use super::{CounterStore, StoreError, WindowSnapshot};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(1);

// Increments the key, arms the TTL when the window opens, and repairs a
// missing TTL (e.g. after a partial administrative flush) so a counter
// can never become immortal. Returns [count, remaining-ttl-ms].
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Redis-backed fixed-window counter store
///
/// Cloning is cheap: the underlying multiplexed connection is shared.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    script: Arc<redis::Script>,
    op_timeout: Duration,
}

impl RedisStore {
    /// Create a store over an established connection
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self::with_timeout(conn, DEFAULT_OP_TIMEOUT)
    }

    /// Create a store with a custom per-operation deadline
    pub fn with_timeout(conn: MultiplexedConnection, op_timeout: Duration) -> Self {
        RedisStore {
            conn,
            script: Arc::new(redis::Script::new(INCREMENT_SCRIPT)),
            op_timeout,
        }
    }

    /// Connect to Redis and build a store
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let conn = tokio::time::timeout(op_timeout, client.get_multiplexed_tokio_connection())
            .await
            .map_err(|_| StoreError::Timeout(op_timeout))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self::with_timeout(conn, op_timeout))
    }

    async fn deadline<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, redis::RedisError>>,
    {
        tokio::time::timeout(self.op_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.op_timeout))?
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        now: SystemTime,
    ) -> Result<WindowSnapshot, StoreError> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis() as i64;

        let (count, ttl_ms): (i64, i64) = self
            .deadline(
                self.script
                    .key(key)
                    .arg(window_ms)
                    .invoke_async(&mut conn),
            )
            .await?;

        // Reconstruct the window start from the remaining TTL. A TTL
        // larger than the window (stale key from a previous, longer
        // configuration) clamps to a window starting now.
        let elapsed_ms = (window_ms - ttl_ms).clamp(0, window_ms) as u64;
        let window_start = now - Duration::from_millis(elapsed_ms);

        Ok(WindowSnapshot {
            count: count.max(0) as u64,
            window_start,
        })
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.deadline(conn.del::<_, ()>(key)).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.deadline(async move {
            redis::cmd("PING").query_async::<_, String>(&mut conn).await
        })
        .await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    //! Live-backend tests. They need a Redis instance at
    //! `redis://127.0.0.1/` and are gated behind `--ignored`:
    //!
    //!     cargo test -- --ignored

    use super::*;

    const REDIS_URL: &str = "redis://127.0.0.1/";

    async fn live_store() -> RedisStore {
        RedisStore::connect(REDIS_URL, Duration::from_secs(1))
            .await
            .expect("these tests need a local Redis on the default port")
    }

    fn unique_key(name: &str) -> String {
        let nonce = SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("gatecrab:livetest:{name}:{nonce}")
    }

    #[tokio::test]
    #[ignore]
    async fn counts_up_within_one_window() {
        let store = live_store().await;
        let key = unique_key("counts");
        let window = Duration::from_secs(60);

        let now = SystemTime::now();
        for expected in 1..=3u64 {
            let snap = store.increment(&key, window, now).await.unwrap();
            assert_eq!(snap.count, expected);
            assert!(snap.window_start <= now);
            assert!(snap.window_start >= now - window);
        }

        store.reset(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn reset_reopens_the_window() {
        let store = live_store().await;
        let key = unique_key("reset");
        let window = Duration::from_secs(60);

        store
            .increment(&key, window, SystemTime::now())
            .await
            .unwrap();
        store
            .increment(&key, window, SystemTime::now())
            .await
            .unwrap();
        store.reset(&key).await.unwrap();

        let snap = store
            .increment(&key, window, SystemTime::now())
            .await
            .unwrap();
        assert_eq!(snap.count, 1);

        store.reset(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn repairs_a_missing_ttl() {
        let store = live_store().await;
        let key = unique_key("ttl");
        let window = Duration::from_secs(60);

        store
            .increment(&key, window, SystemTime::now())
            .await
            .unwrap();

        // Strip the TTL the way a partial administrative flush would.
        let client = redis::Client::open(REDIS_URL).unwrap();
        let mut conn = client.get_multiplexed_tokio_connection().await.unwrap();
        redis::cmd("PERSIST")
            .arg(&key)
            .query_async::<_, ()>(&mut conn)
            .await
            .unwrap();

        let now = SystemTime::now();
        let snap = store.increment(&key, window, now).await.unwrap();
        assert_eq!(snap.count, 2);
        // The script re-armed the TTL, so the snapshot reports a window
        // that just opened rather than an immortal counter.
        assert!(snap.window_start >= now - Duration::from_secs(2));

        store.reset(&key).await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn ping_round_trips() {
        let store = live_store().await;
        store.ping().await.unwrap();
    }
}
