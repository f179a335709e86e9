//! Backing store that keeps nothing: reads miss, writes are dropped.

use std::future::Future;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use hcache_common::CacheResult;

use crate::store::CacheStore;

/// Disabled cache. `get_or_create` always runs the factory.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

#[async_trait]
impl CacheStore for NullStore {
    async fn get<V>(&self, _key: &str) -> CacheResult<Option<V>>
    where
        V: DeserializeOwned + Send + 'static,
    {
        Ok(None)
    }

    async fn get_many<V>(&self, keys: &[String], _parallel: bool) -> CacheResult<Vec<Option<V>>>
    where
        V: DeserializeOwned + Send + 'static,
    {
        Ok(std::iter::repeat_with(|| None).take(keys.len()).collect())
    }

    async fn set<V>(&self, _key: &str, _value: &V) -> CacheResult<()>
    where
        V: Serialize + Sync,
    {
        Ok(())
    }

    async fn set_many<V>(&self, _entries: &[(String, V)], _parallel: bool) -> CacheResult<()>
    where
        V: Serialize + Sync,
    {
        Ok(())
    }

    async fn delete_many(&self, _keys: &[String]) -> CacheResult<()> {
        Ok(())
    }

    async fn get_or_create<V, F, Fut>(&self, _key: &str, factory: F) -> CacheResult<V>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = V> + Send,
    {
        Ok(factory().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn everything_misses() {
        let store = NullStore;
        store.set("k", &1u32).await.unwrap();
        let value: Option<u32> = store.get("k").await.unwrap();
        assert_eq!(value, None);

        let keys = vec!["a".to_string(), "b".to_string()];
        let values: Vec<Option<u32>> = store.get_many(&keys, true).await.unwrap();
        assert_eq!(values, vec![None, None]);
    }

    #[tokio::test]
    async fn factory_runs_every_time() {
        let store = NullStore;
        let first: u32 = store.get_or_create("k", || async { 1 }).await.unwrap();
        let second: u32 = store.get_or_create("k", || async { 2 }).await.unwrap();
        assert_eq!((first, second), (1, 2));
    }
}
