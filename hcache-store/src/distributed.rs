//! # Distributed Cache Store
//!
//! Purpose: Implement the cache contract over a pool of RESP connections to a
//! remote cluster or proxy, with key prefixing, TTL on every write, bounded
//! parallel batches, and a uniform fail-open/fail-closed error policy.
//!
//! ## Design Principles
//! 1. **Boundary Error Policy**: Every backend or codec failure is caught at
//!    the public operation, reported once with all involved keys, then either
//!    returned (`raise_exception`) or replaced by a default result.
//! 2. **One Count per Key**: Each key examined by a read reports exactly one
//!    hit or miss, as soon as its reply arrives.
//! 3. **Detached Fan-Out**: Parallel batches run each key on its own task, at
//!    most `degree_of_parallelism` at a time. The first failure ends the
//!    batch; tasks already dispatched are not cancelled and finish on their own.
//! 4. **No Rollback**: Keys written before a sequential batch fails stay written.
//!
//! ## Structure Overview
//!
//! ```text
//! DistributedCacheStore (cheap Clone)
//!   └── shared: Arc<Shared>
//!         ├── pool: ConnectionPool<T>
//!         ├── options / codec / condition
//!         ├── diagnostics: Arc<DiagnosticEmitter>
//!         └── flights: SingleFlight
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinError;

use hcache_client::{ConnectionPool, PoolConfig, SetCondition, TcpTransport, Transport};
use hcache_common::{
    ActivityKind, CacheError, CacheResult, CacheStoreOptions, ConnectionError, DiagnosticEmitter,
    KeyContext, OverridePolicy, ValueCodec,
};

use crate::flight::SingleFlight;
use crate::store::CacheStore;

/// Cache store backed by a remote RESP cluster.
pub struct DistributedCacheStore<T: Transport = TcpTransport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for DistributedCacheStore<T> {
    fn clone(&self) -> Self {
        DistributedCacheStore {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<T: Transport> {
    pool: ConnectionPool<T>,
    options: CacheStoreOptions,
    codec: ValueCodec,
    condition: SetCondition,
    diagnostics: Arc<DiagnosticEmitter>,
    flights: SingleFlight,
}

impl DistributedCacheStore<TcpTransport> {
    /// Validates `options` and eagerly opens the TCP pool.
    pub async fn connect(
        options: CacheStoreOptions,
        diagnostics: Arc<DiagnosticEmitter>,
    ) -> CacheResult<Self> {
        options.validate()?;
        let pool = ConnectionPool::connect_tcp(PoolConfig::from_options(&options)).await?;
        Ok(Self::new(pool, options, diagnostics))
    }
}

impl<T: Transport> DistributedCacheStore<T> {
    /// Wraps an already opened pool.
    pub fn new(
        pool: ConnectionPool<T>,
        options: CacheStoreOptions,
        diagnostics: Arc<DiagnosticEmitter>,
    ) -> Self {
        let condition = match options.override_policy {
            OverridePolicy::Always => SetCondition::Always,
            OverridePolicy::CreateOnly => SetCondition::IfAbsent,
        };
        DistributedCacheStore {
            shared: Arc::new(Shared {
                pool,
                codec: ValueCodec::from(options.serializer),
                condition,
                options,
                diagnostics,
                flights: SingleFlight::default(),
            }),
        }
    }

    pub fn options(&self) -> &CacheStoreOptions {
        &self.shared.options
    }

    pub fn pool(&self) -> &ConnectionPool<T> {
        &self.shared.pool
    }

    /// Replaces every pooled connection.
    pub async fn reset_connections(&self) -> CacheResult<()> {
        self.shared.pool.reset().await?;
        Ok(())
    }

    /// Reports `err` and applies the configured error policy.
    fn recover<R>(&self, keys: &[String], err: CacheError, fallback: impl FnOnce() -> R) -> CacheResult<R> {
        self.shared.diagnostics.report_error(keys, &err);
        if self.shared.options.raise_exception {
            return Err(err);
        }
        tracing::warn!(keys = keys.len(), error = %err, "cache backend failure suppressed");
        Ok(fallback())
    }

    // Each key is fetched and decoded before the next is requested.
    async fn read_sequential<V>(&self, keys: &[String]) -> CacheResult<Vec<Option<V>>>
    where
        V: DeserializeOwned + Send + 'static,
    {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.shared.load(key).await?);
        }
        Ok(values)
    }

    async fn read_parallel<V>(&self, keys: &[String]) -> CacheResult<Vec<Option<V>>>
    where
        V: DeserializeOwned + Send + 'static,
    {
        stream::iter(keys.iter().cloned())
            .map(|key| {
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move { shared.load::<V>(&key).await })
            })
            .buffered(self.shared.options.degree_of_parallelism.max(1))
            .map(flatten_join)
            .try_collect()
            .await
    }

    async fn write_sequential<V: Serialize + Sync>(&self, entries: &[(String, V)]) -> CacheResult<()> {
        for (key, value) in entries {
            let payload = self.shared.codec.encode(value)?;
            self.shared.write(key, &payload).await?;
        }
        Ok(())
    }

    async fn write_parallel<V: Serialize + Sync>(&self, entries: &[(String, V)]) -> CacheResult<()> {
        let encoded = entries
            .iter()
            .map(|(key, value)| -> CacheResult<(String, Vec<u8>)> {
                Ok((key.clone(), self.shared.codec.encode(value)?))
            })
            .collect::<CacheResult<Vec<_>>>()?;

        stream::iter(encoded)
            .map(|(key, payload)| {
                let shared = Arc::clone(&self.shared);
                tokio::spawn(async move { shared.write(&key, &payload).await })
            })
            .buffered(self.shared.options.degree_of_parallelism.max(1))
            .map(flatten_join)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }
}

impl<T: Transport> Shared<T> {
    /// Fetches raw bytes and reports the hit or miss.
    async fn read(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let physical = self.options.physical_key(key);
        let conn = self.pool.get_connection().await?;
        let bytes = conn.get(physical.as_bytes()).await?;
        if bytes.is_some() {
            self.diagnostics.report_hits(1);
        } else {
            self.diagnostics.report_misses(1);
        }
        Ok(bytes)
    }

    async fn write(&self, key: &str, payload: &[u8]) -> CacheResult<()> {
        let physical = self.options.physical_key(key);
        let conn = self.pool.get_connection().await?;
        let written = conn
            .set_with_ttl(physical.as_bytes(), payload, self.options.ttl(), self.condition)
            .await?;
        if !written {
            tracing::debug!(key, "create-only write skipped existing key");
        }
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> CacheResult<()> {
        let physical: Vec<String> = keys.iter().map(|key| self.options.physical_key(key)).collect();
        let args: Vec<&[u8]> = physical.iter().map(|key| key.as_bytes()).collect();
        let conn = self.pool.get_connection().await?;
        let removed = conn.delete(&args).await?;
        tracing::debug!(requested = keys.len(), removed, "deleted keys");
        Ok(())
    }

    fn decode<V: DeserializeOwned>(&self, bytes: Option<Vec<u8>>) -> CacheResult<Option<V>> {
        Ok(bytes.map(|bytes| self.codec.decode(&bytes)).transpose()?)
    }

    async fn load<V: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<V>> {
        let bytes = self.read(key).await?;
        self.decode(bytes)
    }
}

/// Surfaces a task's own result; a panic in the task is resumed here.
fn flatten_join<R>(joined: Result<CacheResult<R>, JoinError>) -> CacheResult<R> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
        Err(err) => Err(ConnectionError::Io(std::io::Error::new(std::io::ErrorKind::Interrupted, err)).into()),
    }
}

fn misses<V>(count: usize) -> Vec<Option<V>> {
    std::iter::repeat_with(|| None).take(count).collect()
}

#[async_trait]
impl<T: Transport> CacheStore for DistributedCacheStore<T> {
    async fn get<V>(&self, key: &str) -> CacheResult<Option<V>>
    where
        V: DeserializeOwned + Send + 'static,
    {
        let diagnostics = &self.shared.diagnostics;
        let activity = diagnostics.start_activity(KeyContext::Single(key), ActivityKind::Get);

        let outcome = match self.shared.load(key).await {
            Ok(value) => Ok(value),
            Err(err) => self.recover(&[key.to_owned()], err, || None),
        };

        diagnostics.stop_activity(activity);
        outcome
    }

    async fn get_many<V>(&self, keys: &[String], parallel: bool) -> CacheResult<Vec<Option<V>>>
    where
        V: DeserializeOwned + Send + 'static,
    {
        let diagnostics = &self.shared.diagnostics;
        let activity = diagnostics.start_activity(KeyContext::Batch(keys.len()), ActivityKind::Get);

        let read = if parallel {
            self.read_parallel(keys).await
        } else {
            self.read_sequential(keys).await
        };
        let outcome = match read {
            Ok(values) => Ok(values),
            Err(err) => self.recover(keys, err, || misses(keys.len())),
        };

        diagnostics.stop_activity(activity);
        outcome
    }

    async fn set<V>(&self, key: &str, value: &V) -> CacheResult<()>
    where
        V: Serialize + Sync,
    {
        let diagnostics = &self.shared.diagnostics;
        let activity = diagnostics.start_activity(KeyContext::Single(key), ActivityKind::Set);

        let written = match self.shared.codec.encode(value) {
            Ok(payload) => self.shared.write(key, &payload).await,
            Err(err) => Err(err.into()),
        };
        let outcome = match written {
            Ok(()) => Ok(()),
            Err(err) => self.recover(&[key.to_owned()], err, || ()),
        };

        diagnostics.stop_activity(activity);
        outcome
    }

    async fn set_many<V>(&self, entries: &[(String, V)], parallel: bool) -> CacheResult<()>
    where
        V: Serialize + Sync,
    {
        let diagnostics = &self.shared.diagnostics;
        let activity = diagnostics.start_activity(KeyContext::Batch(entries.len()), ActivityKind::Set);

        let written = if parallel {
            self.write_parallel(entries).await
        } else {
            self.write_sequential(entries).await
        };
        let outcome = match written {
            Ok(()) => Ok(()),
            Err(err) => {
                let keys: Vec<String> = entries.iter().map(|(key, _)| key.clone()).collect();
                self.recover(&keys, err, || ())
            }
        };

        diagnostics.stop_activity(activity);
        outcome
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let diagnostics = &self.shared.diagnostics;
        let activity = diagnostics.start_activity(KeyContext::Batch(keys.len()), ActivityKind::Delete);

        let outcome = match self.shared.remove(keys).await {
            Ok(()) => Ok(()),
            Err(err) => self.recover(keys, err, || ()),
        };

        diagnostics.stop_activity(activity);
        outcome
    }

    async fn get_or_create<V, F, Fut>(&self, key: &str, factory: F) -> CacheResult<V>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = V> + Send,
    {
        let _flight = if self.shared.options.single_flight {
            Some(self.shared.flights.lock(key).await)
        } else {
            None
        };

        let cached: Option<V> = self.get(key).await?;
        if let Some(value) = cached {
            return Ok(value);
        }
        let value = factory().await;
        self.set(key, &value).await?;
        Ok(value)
    }
}
