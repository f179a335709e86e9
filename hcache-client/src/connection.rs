//! # Transport Connections
//!
//! Purpose: Define the transport capability the pool consumes (connect,
//! execute, dispose, outstanding-request counter) and provide the tokio TCP
//! implementation speaking RESP2.
//!
//! ## Design Principles
//! 1. **Capability Traits**: The pool only sees `Transport`/`TransportConnection`,
//!    so tests swap in in-process fakes.
//! 2. **Shared Handles**: A connection is used by many callers at once; requests
//!    queue on an async mutex and the queue depth is the load signal.
//! 3. **Buffer Reuse**: Each connection keeps its own read and write buffers.
//! 4. **Poison on Desync**: After an IO/protocol failure or an abandoned
//!    request the stream position is unknown, so the stream is closed.
//! 5. **Lazy Reconnect**: A poisoned connection reopens its stream on the next
//!    request. Only `dispose` ends a connection for good.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use hcache_common::{ClientResult, ConnectionError};

use crate::pool::PoolConfig;
use crate::resp::{encode_command, parse_response, RespValue};

/// Opens connections to the backing cluster.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Connection: TransportConnection;

    async fn connect(&self, config: &PoolConfig) -> ClientResult<Self::Connection>;
}

/// One persistent, concurrently usable connection.
#[async_trait]
pub trait TransportConnection: Send + Sync + 'static {
    /// Executes a command and returns the parsed reply.
    async fn exec(&self, args: &[&[u8]]) -> ClientResult<RespValue>;

    /// Requests issued on this connection that have not completed yet.
    fn outstanding(&self) -> usize;

    /// Closes the connection; later `exec` calls fail with `Disposed`.
    async fn dispose(&self);
}

/// RESP2 over tokio TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    type Connection = TcpConnection;

    async fn connect(&self, config: &PoolConfig) -> ClientResult<TcpConnection> {
        TcpConnection::connect(config).await
    }
}

struct ConnectionIo {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
    // Set while a request is on the wire; still set on entry means the
    // previous caller was dropped mid-request.
    pending: bool,
}

impl ConnectionIo {
    async fn open(addr: &str, connect_timeout: Option<Duration>) -> ClientResult<Self> {
        let connect = TcpStream::connect(addr);
        let stream = match connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .map_err(|_| ConnectionError::ConnectTimeout)??,
            None => connect.await?,
        };
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(ConnectionIo {
            stream,
            read_buf: BytesMut::with_capacity(8 * 1024),
            write_buf: Vec::with_capacity(256),
            pending: false,
        })
    }
}

/// Single TCP connection with reusable buffers.
///
/// The stream slot is `None` while poisoned; the next `exec` reconnects.
pub struct TcpConnection {
    io: Mutex<Option<ConnectionIo>>,
    outstanding: AtomicUsize,
    disposed: AtomicBool,
    addr: String,
    connect_timeout: Option<Duration>,
}

impl TcpConnection {
    async fn connect(config: &PoolConfig) -> ClientResult<Self> {
        if config.addr.trim().is_empty() {
            return Err(ConnectionError::InvalidAddress(config.addr.clone()));
        }
        let io = ConnectionIo::open(&config.addr, config.connect_timeout).await?;

        Ok(TcpConnection {
            io: Mutex::new(Some(io)),
            outstanding: AtomicUsize::new(0),
            disposed: AtomicBool::new(false),
            addr: config.addr.clone(),
            connect_timeout: config.connect_timeout,
        })
    }

    async fn roundtrip(io: &mut ConnectionIo, args: &[&[u8]]) -> ClientResult<RespValue> {
        io.write_buf.clear();
        encode_command(args, &mut io.write_buf);
        io.pending = true;
        io.stream.write_all(&io.write_buf).await?;

        loop {
            if let Some(value) = parse_response(&mut io.read_buf)? {
                io.pending = false;
                return Ok(value);
            }
            let read = io.stream.read_buf(&mut io.read_buf).await?;
            if read == 0 {
                return Err(ConnectionError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed by peer",
                )));
            }
        }
    }
}

#[async_trait]
impl TransportConnection for TcpConnection {
    async fn exec(&self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let _guard = OutstandingGuard::enter(&self.outstanding);
        let mut slot = self.io.lock().await;
        if self.disposed.load(Ordering::Acquire) {
            return Err(ConnectionError::Disposed);
        }

        if slot.as_ref().is_some_and(|io| io.pending) {
            tracing::warn!(addr = %self.addr, "abandoned request left the stream out of sync, closing");
            *slot = None;
        }
        if slot.is_none() {
            tracing::debug!(addr = %self.addr, "reopening poisoned connection");
            *slot = Some(ConnectionIo::open(&self.addr, self.connect_timeout).await?);
        }
        let Some(io) = slot.as_mut() else {
            return Err(ConnectionError::Disposed);
        };

        match Self::roundtrip(io, args).await {
            Ok(value) => Ok(value),
            Err(err) => {
                tracing::warn!(addr = %self.addr, error = %err, "connection failed mid-request, closing");
                *slot = None;
                Err(err)
            }
        }
    }

    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    async fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        if let Some(mut io) = self.io.lock().await.take() {
            let _ = io.stream.shutdown().await;
        }
    }
}

/// Counts a request as outstanding until dropped, including while queued.
struct OutstandingGuard<'a> {
    counter: &'a AtomicUsize,
}

impl<'a> OutstandingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        OutstandingGuard { counter }
    }
}

impl Drop for OutstandingGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}
