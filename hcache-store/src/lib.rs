//! # hcache Stores
//!
//! Purpose: The key-value cache contract applications program against, with
//! distributed, local, and null implementations selected by configuration.
//!
//! ## Design Principles
//! 1. **One Contract**: Every backing store implements [`CacheStore`] with
//!    identical prefix, TTL, and batch-ordering semantics.
//! 2. **Explicit Wiring**: [`CacheContext`] builds the store and its
//!    diagnostics emitter; nothing is process-global.
//! 3. **Policy at the Boundary**: Failures are reported and then either
//!    propagated or replaced by defaults, per `raise_exception`.

pub mod context;
pub mod distributed;
mod flight;
pub mod local;
pub mod null;
pub mod store;

pub use context::{AnyStore, CacheContext};
pub use distributed::DistributedCacheStore;
pub use local::{ExpirationHandle, LocalStore};
pub use null::NullStore;
pub use store::CacheStore;
