//! # Cache Contract
//!
//! Purpose: The single interface application code caches through. The
//! distributed, local, and null stores implement it identically, so swapping
//! the backing store is a configuration change.
//!
//! ## Semantics Shared by Every Implementation
//! - Keys are logical; the configured prefix is applied internally.
//! - Every write sets expiry = now + configured TTL.
//! - Batch reads return one slot per input key, in input order.
//! - A missing key is `Ok(None)`, never an error.

use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use hcache_common::CacheResult;

/// Uniform key-value cache interface.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads one key.
    async fn get<V>(&self, key: &str) -> CacheResult<Option<V>>
    where
        V: DeserializeOwned + Send + 'static;

    /// Reads many keys; the result is aligned with `keys`.
    ///
    /// `parallel` fans out up to the configured degree of parallelism.
    async fn get_many<V>(&self, keys: &[String], parallel: bool) -> CacheResult<Vec<Option<V>>>
    where
        V: DeserializeOwned + Send + 'static;

    /// Writes one key.
    async fn set<V>(&self, key: &str, value: &V) -> CacheResult<()>
    where
        V: Serialize + Sync;

    /// Writes many keys, in slice order when sequential.
    async fn set_many<V>(&self, entries: &[(String, V)], parallel: bool) -> CacheResult<()>
    where
        V: Serialize + Sync;

    /// Removes every key in `keys`.
    async fn delete_many(&self, keys: &[String]) -> CacheResult<()>;

    /// Reads `key`; on a miss runs `factory`, stores its value, and returns it.
    ///
    /// Without single-flight, concurrent misses on the same key may each run
    /// `factory` and each write (last write wins).
    async fn get_or_create<V, F, Fut>(&self, key: &str, factory: F) -> CacheResult<V>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = V> + Send;
}
