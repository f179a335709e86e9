//! # Local Cache Store
//!
//! Purpose: The in-process backing store. Values are codec-encoded into a
//! sharded map so the local store behaves like the distributed one: same
//! prefixing, same TTL on every write, same override policy.
//!
//! ## Design Principles
//! 1. **Sharded Locks**: Per-shard `RwLock`s keep unrelated keys from contending.
//! 2. **Arc-backed Buffers**: Payloads are `Arc<[u8]>` so reads copy nothing
//!    while the shard lock is held.
//! 3. **TTL on Access**: Expired entries read as missing and are dropped on
//!    the next write lock; `purge_expired` sweeps the rest.
//!
//! ## Structure Overview
//!
//! ```text
//! LocalStore (cheap Clone)
//!   └── inner: Arc<LocalInner>
//!         ├── shards: Vec<RwLock<HashMap<String, Entry>>>
//!         └── options / codec
//! ```

use std::future::Future;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::RandomState;
use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;

use hcache_common::{CacheError, CacheResult, CacheStoreOptions, OverridePolicy, ValueCodec};

use crate::store::CacheStore;

/// Default shards = CPU count * multiplier.
const DEFAULT_SHARD_MULTIPLIER: usize = 4;

#[derive(Debug)]
struct Entry {
    payload: Arc<[u8]>,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

type Shard = RwLock<HashMap<String, Entry, RandomState>>;

struct LocalInner {
    shards: Vec<Shard>,
    shard_mask: usize,
    hash_state: RandomState,
    options: CacheStoreOptions,
    codec: ValueCodec,
}

/// Cache store backed by an in-process sharded map.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<LocalInner>,
}

/// Background sweeper started by [`LocalStore::start_expirer`].
///
/// The sweep task is aborted when the handle is stopped or dropped.
pub struct ExpirationHandle {
    task: Option<JoinHandle<()>>,
}

impl ExpirationHandle {
    pub fn stop(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ExpirationHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

impl LocalStore {
    /// Creates a store with a shard count derived from CPU parallelism.
    pub fn new(options: CacheStoreOptions) -> Self {
        let threads = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);
        Self::with_shard_count(options, threads.saturating_mul(DEFAULT_SHARD_MULTIPLIER))
    }

    /// The count is rounded up to a power of two.
    pub fn with_shard_count(options: CacheStoreOptions, shards: usize) -> Self {
        let shard_count = shards.max(1).next_power_of_two();
        let hash_state = RandomState::new();
        let shards = (0..shard_count)
            .map(|_| RwLock::new(HashMap::with_hasher(hash_state.clone())))
            .collect();

        LocalStore {
            inner: Arc::new(LocalInner {
                shards,
                shard_mask: shard_count - 1,
                hash_state,
                codec: ValueCodec::from(options.serializer),
                options,
            }),
        }
    }

    pub fn options(&self) -> &CacheStoreOptions {
        &self.inner.options
    }

    /// Live and not yet purged entries across all shards.
    pub fn len(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry expired at `now`.
    ///
    /// Reads already hide expired entries; this reclaims their memory.
    ///
    /// **Input**: `now`, the instant expiry is judged against.
    /// **Output**: the number of entries removed.
    ///
    /// **Logic**: write-lock one shard at a time and retain live entries, so
    /// the sweep never blocks the whole store.
    pub fn purge_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        for shard in &self.inner.shards {
            let mut map = shard.write();
            let before = map.len();
            map.retain(|_, entry| !entry.is_expired(now));
            removed += before - map.len();
        }
        removed
    }

    /// Spawns a tokio task that calls `purge_expired` every `interval`.
    pub fn start_expirer(&self, interval: Duration) -> ExpirationHandle {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };
        let store = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = store.purge_expired(Instant::now());
                if removed > 0 {
                    tracing::debug!(removed, "purged expired local entries");
                }
            }
        });
        ExpirationHandle { task: Some(task) }
    }

    fn shard_for(&self, physical: &str) -> &Shard {
        let idx = (self.inner.hash_state.hash_one(physical) as usize) & self.inner.shard_mask;
        &self.inner.shards[idx]
    }

    fn read_raw(&self, key: &str) -> Option<Arc<[u8]>> {
        let physical = self.inner.options.physical_key(key);
        let map = self.shard_for(&physical).read();
        map.get(physical.as_str())
            .filter(|entry| !entry.is_expired(Instant::now()))
            .map(|entry| Arc::clone(&entry.payload))
    }

    fn write_raw(&self, key: &str, payload: Vec<u8>) {
        let physical = self.inner.options.physical_key(key);
        let now = Instant::now();
        let mut map = self.shard_for(&physical).write();

        if self.inner.options.override_policy == OverridePolicy::CreateOnly
            && map
                .get(physical.as_str())
                .is_some_and(|entry| !entry.is_expired(now))
        {
            tracing::debug!(key, "create-only write skipped existing key");
            return;
        }

        map.insert(
            physical,
            Entry {
                payload: Arc::from(payload),
                expires_at: now + self.inner.options.ttl(),
            },
        );
    }

    fn remove_raw(&self, key: &str) {
        let physical = self.inner.options.physical_key(key);
        self.shard_for(&physical).write().remove(physical.as_str());
    }

    fn load<V: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<V>> {
        Ok(self
            .read_raw(key)
            .map(|payload| self.inner.codec.decode(&payload))
            .transpose()?)
    }

    fn store<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> CacheResult<()> {
        let payload = self.inner.codec.encode(value)?;
        self.write_raw(key, payload);
        Ok(())
    }

    fn recover<R>(&self, err: CacheError, fallback: impl FnOnce() -> R) -> CacheResult<R> {
        if self.inner.options.raise_exception {
            return Err(err);
        }
        tracing::warn!(error = %err, "local cache failure suppressed");
        Ok(fallback())
    }
}

#[async_trait]
impl CacheStore for LocalStore {
    async fn get<V>(&self, key: &str) -> CacheResult<Option<V>>
    where
        V: DeserializeOwned + Send + 'static,
    {
        self.load(key).or_else(|err| self.recover(err, || None))
    }

    // In-process reads never block, so `parallel` does not change the plan.
    async fn get_many<V>(&self, keys: &[String], _parallel: bool) -> CacheResult<Vec<Option<V>>>
    where
        V: DeserializeOwned + Send + 'static,
    {
        keys.iter()
            .map(|key| self.load(key))
            .collect::<CacheResult<Vec<_>>>()
            .or_else(|err| {
                self.recover(err, || std::iter::repeat_with(|| None).take(keys.len()).collect())
            })
    }

    async fn set<V>(&self, key: &str, value: &V) -> CacheResult<()>
    where
        V: Serialize + Sync,
    {
        self.store(key, value).or_else(|err| self.recover(err, || ()))
    }

    async fn set_many<V>(&self, entries: &[(String, V)], _parallel: bool) -> CacheResult<()>
    where
        V: Serialize + Sync,
    {
        entries
            .iter()
            .try_for_each(|(key, value)| self.store(key, value))
            .or_else(|err| self.recover(err, || ()))
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<()> {
        for key in keys {
            self.remove_raw(key);
        }
        Ok(())
    }

    async fn get_or_create<V, F, Fut>(&self, key: &str, factory: F) -> CacheResult<V>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = V> + Send,
    {
        let cached: Option<V> = self.get(key).await?;
        if let Some(value) = cached {
            return Ok(value);
        }
        let value = factory().await;
        self.set(key, &value).await?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hcache_common::{BackingStore, SerializerKind};

    fn options() -> CacheStoreOptions {
        CacheStoreOptions {
            backing_store: BackingStore::Local,
            key_prefix: "app:".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn set_then_get_returns_value() {
        let store = LocalStore::with_shard_count(options(), 4);
        store.set("user:42", &"Alice".to_string()).await.unwrap();

        let value: Option<String> = store.get("user:42").await.unwrap();
        assert_eq!(value.as_deref(), Some("Alice"));
        let missing: Option<String> = store.get("user:43").await.unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn physical_key_carries_prefix() {
        let store = LocalStore::with_shard_count(options(), 1);
        store.set("k", &1u32).await.unwrap();
        assert!(store.read_raw("k").is_some());
        let map = store.inner.shards[0].read();
        assert!(map.contains_key("app:k"));
    }

    #[tokio::test]
    async fn batch_reads_follow_input_order() {
        let store = LocalStore::with_shard_count(options(), 8);
        let entries: Vec<(String, u64)> = (0..16).map(|i| (format!("k{i}"), i)).collect();
        store.set_many(&entries, false).await.unwrap();

        let mut keys: Vec<String> = entries.iter().map(|(key, _)| key.clone()).collect();
        keys.insert(3, "absent".into());
        let values: Vec<Option<u64>> = store.get_many(&keys, true).await.unwrap();

        assert_eq!(values.len(), 17);
        assert_eq!(values[3], None);
        assert_eq!(values[0], Some(0));
        assert_eq!(values[16], Some(15));
    }

    #[tokio::test]
    async fn delete_many_removes_keys() {
        let store = LocalStore::with_shard_count(options(), 4);
        store.set("a", &1u8).await.unwrap();
        store.set("b", &2u8).await.unwrap();
        store.delete_many(&["a".to_string(), "b".to_string(), "c".to_string()]).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn create_only_keeps_first_value() {
        let store = LocalStore::with_shard_count(
            CacheStoreOptions {
                override_policy: OverridePolicy::CreateOnly,
                ..options()
            },
            2,
        );
        store.set("k", &"first".to_string()).await.unwrap();
        store.set("k", &"second".to_string()).await.unwrap();
        let value: Option<String> = store.get("k").await.unwrap();
        assert_eq!(value.as_deref(), Some("first"));
    }

    /// Moves every entry's deadline to now, as if its TTL had just run out.
    fn expire_all(store: &LocalStore) {
        let now = Instant::now();
        for shard in &store.inner.shards {
            for entry in shard.write().values_mut() {
                entry.expires_at = now;
            }
        }
    }

    #[tokio::test]
    async fn read_after_ttl_is_a_miss() {
        let store = LocalStore::with_shard_count(options(), 4);
        let before = Instant::now();
        store.set("user:42", &"Alice".to_string()).await.unwrap();

        {
            let physical = store.options().physical_key("user:42");
            let map = store.shard_for(&physical).read();
            let ttl = map[physical.as_str()].expires_at - before;
            assert!(ttl >= Duration::from_secs(15 * 60));
            assert!(ttl < Duration::from_secs(15 * 60 + 5));
        }
        let value: Option<String> = store.get("user:42").await.unwrap();
        assert_eq!(value.as_deref(), Some("Alice"));

        expire_all(&store);
        let value: Option<String> = store.get("user:42").await.unwrap();
        assert_eq!(value, None);
        // Nothing has been purged; the entry is hidden, not removed.
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn create_only_overwrites_an_expired_entry() {
        let store = LocalStore::with_shard_count(
            CacheStoreOptions {
                override_policy: OverridePolicy::CreateOnly,
                ..options()
            },
            2,
        );
        store.set("k", &1u32).await.unwrap();
        expire_all(&store);
        store.set("k", &2u32).await.unwrap();
        let value: Option<u32> = store.get("k").await.unwrap();
        assert_eq!(value, Some(2));
    }

    #[tokio::test]
    async fn purge_drops_only_expired_entries() {
        let store = LocalStore::with_shard_count(options(), 4);
        store.set("a", &1u8).await.unwrap();
        store.set("b", &2u8).await.unwrap();

        assert_eq!(store.purge_expired(Instant::now()), 0);
        let later = Instant::now() + store.options().ttl() + Duration::from_secs(1);
        assert_eq!(store.purge_expired(later), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn get_or_create_stores_factory_value() {
        let store = LocalStore::with_shard_count(options(), 4);
        let first: u32 = store.get_or_create("n", || async { 7 }).await.unwrap();
        let second: u32 = store.get_or_create("n", || async { 8 }).await.unwrap();
        assert_eq!((first, second), (7, 7));
    }

    #[tokio::test]
    async fn decode_failure_follows_error_policy() {
        let lenient = LocalStore::with_shard_count(
            CacheStoreOptions {
                serializer: SerializerKind::SchemaBased,
                ..options()
            },
            2,
        );
        lenient.set("k", &"text".to_string()).await.unwrap();
        let value: Option<u64> = lenient.get("k").await.unwrap();
        assert_eq!(value, None);

        let strict = LocalStore::with_shard_count(
            CacheStoreOptions {
                serializer: SerializerKind::SchemaBased,
                raise_exception: true,
                ..options()
            },
            2,
        );
        strict.set("k", &"text".to_string()).await.unwrap();
        let result: CacheResult<Option<u64>> = strict.get("k").await;
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[tokio::test]
    async fn expirer_keeps_live_entries() {
        let store = LocalStore::with_shard_count(
            CacheStoreOptions {
                ttl_minutes: 1,
                ..options()
            },
            2,
        );
        store.set("k", &1u8).await.unwrap();
        let handle = store.start_expirer(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.len(), 1);
        handle.stop();
    }
}
