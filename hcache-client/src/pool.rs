//! # Connection Pool
//!
//! Purpose: Hold a fixed set of persistent connections to the backing cluster
//! and hand out the least-loaded one per request.
//!
//! ## Design Principles
//! 1. **Eager, All-or-Nothing**: Every connection is opened up front; if one
//!    fails the already-opened ones are disposed and construction fails.
//! 2. **Least Outstanding**: Selection scans the live outstanding-request
//!    counters and picks the first minimum in slot order.
//! 3. **Guarded Snapshot**: Selection holds a read lock only for the scan;
//!    `reset` holds the write lock across dispose-all and reopen-all, so no
//!    caller ever observes a half-rebuilt set.
//! 4. **No Self-Healing**: Broken connections stay in place until `reset`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use hcache_common::{CacheStoreOptions, ClientResult, ConnectionError};

use crate::connection::{TcpTransport, Transport, TransportConnection};
use crate::resp::RespValue;

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Cluster or proxy address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Exact number of connections held.
    pub max_connections: usize,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl PoolConfig {
    pub fn from_options(options: &CacheStoreOptions) -> Self {
        PoolConfig {
            addr: options.host_address.clone(),
            max_connections: options.max_connections,
            connect_timeout: options.connect_timeout(),
        }
    }
}

struct PoolState<C> {
    generation: u64,
    connections: Vec<Arc<C>>,
}

/// Fixed-size pool of persistent connections.
pub struct ConnectionPool<T: Transport = TcpTransport> {
    transport: T,
    config: PoolConfig,
    state: RwLock<PoolState<T::Connection>>,
}

impl<T: Transport> fmt::Debug for ConnectionPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConnectionPool<TcpTransport> {
    /// Opens a TCP pool described by `config`.
    pub async fn connect_tcp(config: PoolConfig) -> ClientResult<Self> {
        Self::connect(TcpTransport, config).await
    }
}

impl<T: Transport> ConnectionPool<T> {
    /// Opens exactly `config.max_connections` connections.
    ///
    /// **Input**: a `transport` and the pool `config`.
    /// **Output**: a ready pool at generation 0, or the first connect error.
    ///
    /// **Logic**:
    /// 1. Open connections one at a time in slot order.
    /// 2. On the first failure dispose the ones already open and return it.
    pub async fn connect(transport: T, config: PoolConfig) -> ClientResult<Self> {
        let connections = open_all(&transport, &config).await?;
        Ok(ConnectionPool {
            transport,
            config,
            state: RwLock::new(PoolState {
                generation: 0,
                connections,
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns the connection with the fewest outstanding requests.
    ///
    /// **Input**: none.
    /// **Output**: a handle to the chosen connection, or `PoolUninitialized`
    /// when the pool holds no connections.
    ///
    /// **Logic**:
    /// 1. Take the read lock, so no `reset` runs during the scan.
    /// 2. Pick the first minimum of the outstanding counters (ties go to the
    ///    lowest slot).
    /// 3. A set smaller than configured falls back to its first connection.
    pub async fn get_connection(&self) -> ClientResult<ConnectionHandle<T::Connection>> {
        let state = self.state.read().await;

        let picked = if state.connections.len() < self.config.max_connections {
            state.connections.first().map(|conn| (0, conn))
        } else {
            state
                .connections
                .iter()
                .enumerate()
                .min_by_key(|(_, conn)| conn.outstanding())
        };

        picked
            .map(|(slot, conn)| ConnectionHandle {
                conn: Arc::clone(conn),
                slot,
                generation: state.generation,
            })
            .ok_or(ConnectionError::PoolUninitialized)
    }

    /// Disposes every connection, then opens a fresh set of the same size.
    ///
    /// **Input**: none.
    /// **Output**: `Ok(())` once the new set is open, or the connect error.
    ///
    /// **Logic**:
    /// 1. Take the write lock, waiting out in-flight selections.
    /// 2. Dispose every connection; outstanding handles now fail with `Disposed`.
    /// 3. Bump the generation and open a full new set.
    /// 4. On failure leave the pool empty; `get_connection` reports
    ///    `PoolUninitialized` until a later `reset` succeeds.
    pub async fn reset(&self) -> ClientResult<()> {
        let mut state = self.state.write().await;
        tracing::info!(addr = %self.config.addr, size = state.connections.len(), "resetting connection pool");

        for conn in state.connections.drain(..) {
            conn.dispose().await;
        }
        state.generation += 1;
        state.connections = open_all(&self.transport, &self.config).await?;
        Ok(())
    }

    /// Disposes every connection without reopening.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        for conn in state.connections.drain(..) {
            conn.dispose().await;
        }
        state.generation += 1;
    }

    /// Number of live connections.
    pub async fn size(&self) -> usize {
        self.state.read().await.connections.len()
    }

    /// Outstanding-request count per slot.
    pub async fn load(&self) -> Vec<usize> {
        self.state
            .read()
            .await
            .connections
            .iter()
            .map(|conn| conn.outstanding())
            .collect()
    }
}

async fn open_all<T: Transport>(transport: &T, config: &PoolConfig) -> ClientResult<Vec<Arc<T::Connection>>> {
    let mut connections = Vec::with_capacity(config.max_connections);
    for slot in 0..config.max_connections {
        match transport.connect(config).await {
            Ok(conn) => connections.push(Arc::new(conn)),
            Err(err) => {
                tracing::warn!(addr = %config.addr, slot, error = %err, "failed to open pooled connection");
                for conn in connections.drain(..) {
                    conn.dispose().await;
                }
                return Err(err);
            }
        }
    }
    tracing::info!(addr = %config.addr, size = connections.len(), "connection pool initialized");
    Ok(connections)
}

/// A connection selected by the pool.
///
/// Not `Clone`: it lives for one operation and cannot dispose the connection.
pub struct ConnectionHandle<C> {
    conn: Arc<C>,
    slot: usize,
    generation: u64,
}

impl<C: TransportConnection> ConnectionHandle<C> {
    pub async fn exec(&self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.conn.exec(args).await
    }

    pub fn outstanding(&self) -> usize {
        self.conn.outstanding()
    }

    /// Position of the connection in the pool.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Incremented by every `reset`.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<C> fmt::Debug for ConnectionHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}
