//! # Cache Context
//!
//! Purpose: Composition root. Turns one `CacheStoreOptions` into a ready
//! store plus the diagnostics emitter every layer shares, replacing any
//! process-wide singleton.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use hcache_common::{BackingStore, CacheResult, CacheStoreOptions, DiagnosticEmitter, DiagnosticListener};

use crate::distributed::DistributedCacheStore;
use crate::local::{ExpirationHandle, LocalStore};
use crate::null::NullStore;
use crate::store::CacheStore;

/// How often the local store sweeps expired entries.
const LOCAL_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Store selected by `backing_store`.
#[derive(Clone)]
pub enum AnyStore {
    Distributed(DistributedCacheStore),
    Local(LocalStore),
    Null(NullStore),
}

#[async_trait]
impl CacheStore for AnyStore {
    async fn get<V>(&self, key: &str) -> CacheResult<Option<V>>
    where
        V: DeserializeOwned + Send + 'static,
    {
        match self {
            AnyStore::Distributed(store) => store.get(key).await,
            AnyStore::Local(store) => store.get(key).await,
            AnyStore::Null(store) => store.get(key).await,
        }
    }

    async fn get_many<V>(&self, keys: &[String], parallel: bool) -> CacheResult<Vec<Option<V>>>
    where
        V: DeserializeOwned + Send + 'static,
    {
        match self {
            AnyStore::Distributed(store) => store.get_many(keys, parallel).await,
            AnyStore::Local(store) => store.get_many(keys, parallel).await,
            AnyStore::Null(store) => store.get_many(keys, parallel).await,
        }
    }

    async fn set<V>(&self, key: &str, value: &V) -> CacheResult<()>
    where
        V: Serialize + Sync,
    {
        match self {
            AnyStore::Distributed(store) => store.set(key, value).await,
            AnyStore::Local(store) => store.set(key, value).await,
            AnyStore::Null(store) => store.set(key, value).await,
        }
    }

    async fn set_many<V>(&self, entries: &[(String, V)], parallel: bool) -> CacheResult<()>
    where
        V: Serialize + Sync,
    {
        match self {
            AnyStore::Distributed(store) => store.set_many(entries, parallel).await,
            AnyStore::Local(store) => store.set_many(entries, parallel).await,
            AnyStore::Null(store) => store.set_many(entries, parallel).await,
        }
    }

    async fn delete_many(&self, keys: &[String]) -> CacheResult<()> {
        match self {
            AnyStore::Distributed(store) => store.delete_many(keys).await,
            AnyStore::Local(store) => store.delete_many(keys).await,
            AnyStore::Null(store) => store.delete_many(keys).await,
        }
    }

    async fn get_or_create<V, F, Fut>(&self, key: &str, factory: F) -> CacheResult<V>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = V> + Send,
    {
        match self {
            AnyStore::Distributed(store) => store.get_or_create(key, factory).await,
            AnyStore::Local(store) => store.get_or_create(key, factory).await,
            AnyStore::Null(store) => store.get_or_create(key, factory).await,
        }
    }
}

/// A configured store and its diagnostics emitter.
pub struct CacheContext {
    store: AnyStore,
    diagnostics: Arc<DiagnosticEmitter>,
    options: CacheStoreOptions,
    _expirer: Option<ExpirationHandle>,
}

impl CacheContext {
    /// Validates `options` and builds the selected store.
    ///
    /// The distributed store opens its whole pool here; an unreachable host
    /// fails the build. The local store starts its expiry sweep, which must
    /// run inside a tokio runtime.
    pub async fn build(options: CacheStoreOptions) -> CacheResult<Self> {
        Self::build_with_emitter(options, Arc::new(DiagnosticEmitter::new())).await
    }

    /// Same as [`CacheContext::build`], with `listener` subscribed up front.
    pub async fn build_with_listener(
        options: CacheStoreOptions,
        listener: Arc<dyn DiagnosticListener>,
    ) -> CacheResult<Self> {
        let diagnostics = Arc::new(DiagnosticEmitter::new());
        diagnostics.subscribe(listener);
        Self::build_with_emitter(options, diagnostics).await
    }

    async fn build_with_emitter(
        options: CacheStoreOptions,
        diagnostics: Arc<DiagnosticEmitter>,
    ) -> CacheResult<Self> {
        options.validate()?;

        let mut expirer = None;
        let store = match options.backing_store {
            BackingStore::Distributed => AnyStore::Distributed(
                DistributedCacheStore::connect(options.clone(), Arc::clone(&diagnostics)).await?,
            ),
            BackingStore::Local => {
                let store = LocalStore::new(options.clone());
                expirer = Some(store.start_expirer(LOCAL_PURGE_INTERVAL));
                AnyStore::Local(store)
            }
            BackingStore::None => AnyStore::Null(NullStore),
        };
        tracing::info!(
            backing_store = ?options.backing_store,
            serializer = ?options.serializer,
            "cache context ready"
        );

        Ok(CacheContext {
            store,
            diagnostics,
            options,
            _expirer: expirer,
        })
    }

    pub fn store(&self) -> &AnyStore {
        &self.store
    }

    pub fn diagnostics(&self) -> &Arc<DiagnosticEmitter> {
        &self.diagnostics
    }

    pub fn options(&self) -> &CacheStoreOptions {
        &self.options
    }
}
