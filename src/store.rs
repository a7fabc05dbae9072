use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use thiserror::Error;
use tracing::warn;

use crate::config::{Config, StoreBackend};

/// Error raised by a single store operation. The tracker converts these to
/// the operation's safe default; they never reach a request handler.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),
    #[error("store command failed: {0}")]
    Command(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_timeout() || err.is_connection_refusal() {
            StoreError::Unreachable(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Shared expiring key-value store holding one key per online user.
///
/// The store's own expiry is the fallback that converges a user to offline
/// even when the explicit goodbye never arrives.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Upsert `key` with a TTL after which it disappears with no further
    /// action.
    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Lazily yield every live key starting with `prefix`, without
    /// materializing the full set. A scan error ends the stream early.
    fn scan_prefix(&self, prefix: &str) -> BoxStream<'static, String>;
}

/// Build the configured store. A bad Redis URL or unreachable server is a
/// configuration error and fails startup, unlike steady-state store faults.
pub async fn from_config(config: &Config) -> Result<Arc<dyn PresenceStore>> {
    match config.store {
        StoreBackend::Redis => Ok(Arc::new(RedisStore::connect(&config.redis_url).await?)),
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
    }
}

/// Presence store backed by a shared Redis instance.
pub struct RedisStore {
    conn: ConnectionManager,
}

const SCAN_COUNT: usize = 100;

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let config = ConnectionManagerConfig::new()
            .set_number_of_retries(1)
            .set_connection_timeout(Duration::from_millis(500));
        let conn = client
            .get_connection_manager_with_config(config)
            .await
            .context("redis connection failed")?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl PresenceStore for RedisStore {
    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(key).await?;
        Ok(found)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> BoxStream<'static, String> {
        struct ScanState {
            conn: ConnectionManager,
            pattern: String,
            cursor: u64,
            buffer: VecDeque<String>,
            done: bool,
        }

        let state = ScanState {
            conn: self.conn.clone(),
            pattern: format!("{prefix}*"),
            cursor: 0,
            buffer: VecDeque::new(),
            done: false,
        };

        stream::unfold(state, |mut st| async move {
            loop {
                if let Some(key) = st.buffer.pop_front() {
                    return Some((key, st));
                }
                if st.done {
                    return None;
                }
                let reply: Result<(u64, Vec<String>), redis::RedisError> = redis::cmd("SCAN")
                    .arg(st.cursor)
                    .arg("MATCH")
                    .arg(&st.pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query_async(&mut st.conn)
                    .await;
                match reply {
                    Ok((next, keys)) => {
                        st.cursor = next;
                        st.done = next == 0;
                        st.buffer.extend(keys);
                    }
                    Err(err) => {
                        warn!("presence scan failed: {err}");
                        return None;
                    }
                }
            }
        })
        .boxed()
    }
}

/// In-process store with TTL emulation. Keys are pruned lazily on access,
/// which is enough to uphold the exists-iff-online invariant.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune(entries: &mut HashMap<String, (String, Instant)>) {
        let now = Instant::now();
        entries.retain(|_, (_, deadline)| *deadline > now);
    }
}

#[async_trait]
impl PresenceStore for MemoryStore {
    async fn set_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let mut guard = self.entries.lock();
        guard.insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut guard = self.entries.lock();
        Self::prune(&mut guard);
        Ok(guard.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> BoxStream<'static, String> {
        let mut guard = self.entries.lock();
        Self::prune(&mut guard);
        let keys: Vec<String> = guard
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        stream::iter(keys).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn memory_store_expires_keys() {
        let store = MemoryStore::new();
        store
            .set_with_expiry("whoisonline:user:1", "0", Duration::from_millis(40))
            .await
            .unwrap();
        assert!(store.exists("whoisonline:user:1").await.unwrap());
        sleep(Duration::from_millis(60)).await;
        assert!(!store.exists("whoisonline:user:1").await.unwrap());
    }

    #[tokio::test]
    async fn memory_store_scan_filters_prefix() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(5);
        store
            .set_with_expiry("whoisonline:user:1", "0", ttl)
            .await
            .unwrap();
        store
            .set_with_expiry("whoisonline:user:2", "0", ttl)
            .await
            .unwrap();
        store.set_with_expiry("other:9", "0", ttl).await.unwrap();
        let mut keys: Vec<String> = store.scan_prefix("whoisonline:user:").collect().await;
        keys.sort();
        assert_eq!(keys, vec!["whoisonline:user:1", "whoisonline:user:2"]);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store.delete("whoisonline:user:1").await.unwrap();
        store
            .set_with_expiry("whoisonline:user:1", "0", Duration::from_secs(5))
            .await
            .unwrap();
        store.delete("whoisonline:user:1").await.unwrap();
        assert!(!store.exists("whoisonline:user:1").await.unwrap());
    }
}
