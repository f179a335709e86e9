//! # Cache Store Options
//!
//! Purpose: A single options object selecting the backing store, codec, pool
//! size, and error policy, plus a loader that layers defaults, a TOML file,
//! and `HCACHE_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// Environment variable prefix read by [`OptionsLoader`].
pub const ENV_PREFIX: &str = "HCACHE_";

/// Which implementation backs the cache contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackingStore {
    /// Remote RESP cluster or proxy reached through the connection pool.
    Distributed,
    /// In-process sharded map.
    Local,
    /// Discards writes, misses every read.
    None,
}

/// Codec used to turn values into bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SerializerKind {
    CompactBinary,
    SchemaBased,
}

/// Write behavior when a key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverridePolicy {
    /// Replace any existing value.
    Always,
    /// Only write when the key is absent.
    CreateOnly,
}

/// Options for every cache store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheStoreOptions {
    pub backing_store: BackingStore,
    pub serializer: SerializerKind,
    /// Cluster or proxy address, e.g. "127.0.0.1:6379".
    pub host_address: String,
    /// Number of persistent connections held by the pool.
    pub max_connections: usize,
    /// Fan-out bound for parallel batch operations.
    pub degree_of_parallelism: usize,
    /// Expiration applied to every write.
    pub ttl_minutes: u64,
    /// Prepended to every logical key.
    pub key_prefix: String,
    /// Propagate backend failures instead of returning defaults.
    pub raise_exception: bool,
    pub override_policy: OverridePolicy,
    /// Optional TCP connect timeout handed to the transport.
    pub connect_timeout_ms: Option<u64>,
    /// Coalesce concurrent `get_or_create` misses on the same key.
    pub single_flight: bool,
}

impl Default for CacheStoreOptions {
    fn default() -> Self {
        CacheStoreOptions {
            backing_store: BackingStore::Distributed,
            serializer: SerializerKind::CompactBinary,
            host_address: String::new(),
            max_connections: 30,
            degree_of_parallelism: 4,
            ttl_minutes: 15,
            key_prefix: String::new(),
            raise_exception: false,
            override_policy: OverridePolicy::Always,
            connect_timeout_ms: None,
            single_flight: false,
        }
    }
}

impl CacheStoreOptions {
    /// Expiration as a `Duration`.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_minutes.saturating_mul(60))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_ms.map(Duration::from_millis)
    }

    /// Applies the prefix rule: `physical = prefix + logical`.
    #[inline]
    pub fn physical_key(&self, key: &str) -> String {
        let mut physical = String::with_capacity(self.key_prefix.len() + key.len());
        physical.push_str(&self.key_prefix);
        physical.push_str(key);
        physical
    }

    /// Rejects option combinations no store can run with.
    pub fn validate(&self) -> CacheResult<()> {
        if self.max_connections == 0 {
            return Err(CacheError::Config("max_connections must be at least 1".into()));
        }
        if self.degree_of_parallelism == 0 {
            return Err(CacheError::Config(
                "degree_of_parallelism must be at least 1".into(),
            ));
        }
        if self.ttl_minutes == 0 {
            return Err(CacheError::Config("ttl_minutes must be at least 1".into()));
        }
        if self.backing_store == BackingStore::Distributed && self.host_address.trim().is_empty() {
            return Err(CacheError::Config(
                "host_address is required for the distributed backing store".into(),
            ));
        }
        Ok(())
    }
}

/// Layers defaults, an optional TOML file, and environment variables.
#[derive(Debug, Clone, Default)]
pub struct OptionsLoader {
    config_path: Option<PathBuf>,
}

impl OptionsLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads this TOML file when it exists; a missing file is skipped.
    pub fn with_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Loads and validates options. Later sources override earlier ones.
    pub fn load(&self) -> CacheResult<CacheStoreOptions> {
        let mut figment = Figment::new().merge(Serialized::defaults(CacheStoreOptions::default()));

        if let Some(path) = &self.config_path {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading cache options file");
                figment = figment.merge(Toml::file(path));
            } else {
                tracing::debug!(path = %path.display(), "cache options file not found, skipping");
            }
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        let options: CacheStoreOptions = figment
            .extract()
            .map_err(|err| CacheError::Config(err.to_string()))?;
        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let options = CacheStoreOptions::default();
        assert_eq!(options.ttl_minutes, 15);
        assert_eq!(options.degree_of_parallelism, 4);
        assert_eq!(options.max_connections, 30);
        assert!(!options.raise_exception);
        assert_eq!(options.override_policy, OverridePolicy::Always);
        assert_eq!(options.ttl(), Duration::from_secs(900));
    }

    #[test]
    fn prefix_is_prepended() {
        let options = CacheStoreOptions {
            key_prefix: "app:".into(),
            ..Default::default()
        };
        assert_eq!(options.physical_key("user:42"), "app:user:42");
    }

    #[test]
    fn validate_rejects_missing_host_for_distributed() {
        let options = CacheStoreOptions::default();
        assert!(matches!(options.validate(), Err(CacheError::Config(_))));

        let local = CacheStoreOptions {
            backing_store: BackingStore::Local,
            ..Default::default()
        };
        assert!(local.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_sizes() {
        let options = CacheStoreOptions {
            backing_store: BackingStore::None,
            degree_of_parallelism: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn loader_reads_toml_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "backing_store = \"local\"\nserializer = \"schema-based\"\nkey_prefix = \"app:\"\nttl_minutes = 5\noverride_policy = \"create-only\""
        )
        .expect("write");

        let options = OptionsLoader::new()
            .with_config_path(file.path())
            .load()
            .expect("load");
        assert_eq!(options.backing_store, BackingStore::Local);
        assert_eq!(options.serializer, SerializerKind::SchemaBased);
        assert_eq!(options.key_prefix, "app:");
        assert_eq!(options.ttl_minutes, 5);
        assert_eq!(options.override_policy, OverridePolicy::CreateOnly);
    }

    #[test]
    fn loader_surfaces_validation_errors() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "backing_store = \"local\"\nmax_connections = 0").expect("write");

        let result = OptionsLoader::new().with_config_path(file.path()).load();
        assert!(matches!(result, Err(CacheError::Config(_))));
    }
}
