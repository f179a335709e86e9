//! # hcache RESP Client
//!
//! Purpose: Keep a fixed pool of persistent RESP2 connections to a cache
//! cluster or proxy and route each request to the least-loaded one.
//!
//! ## Design Principles
//! 1. **Capability Seams**: Transports are traits so the pool is testable
//!    without a network.
//! 2. **Minimal Allocation**: Reuse per-connection buffers for framing.
//! 3. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.

mod commands;
mod connection;
mod pool;
mod resp;

pub use commands::SetCondition;
pub use connection::{TcpConnection, TcpTransport, Transport, TransportConnection};
pub use pool::{ConnectionHandle, ConnectionPool, PoolConfig};
pub use resp::{encode_command, parse_response, RespValue};

pub use hcache_common::{ClientResult, ConnectionError};
