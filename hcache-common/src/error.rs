//! # Error Taxonomy
//!
//! Purpose: Classify every failure the cache layer can observe so callers and
//! diagnostics listeners can tell transport faults from codec faults.
//!
//! ## Design Principles
//! 1. **Miss Is Not an Error**: Absent keys surface as `Ok(None)`.
//! 2. **Source Preservation**: Wrapped errors keep their `source()` chain.
//! 3. **Layered Enums**: The client only knows `ConnectionError`; the store
//!    lifts it into `CacheError` at the operation boundary.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type for transport and pool operations.
pub type ClientResult<T> = Result<T, ConnectionError>;

/// Top-level error surfaced by every cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend unreachable, timed out, or pool unusable.
    #[error("connection error: {0}")]
    Connection(#[from] ConnectionError),
    /// Value could not be encoded or decoded by the configured codec.
    #[error("serialization error: {0}")]
    Serialization(#[from] SerializationError),
    /// Options failed validation or could not be loaded.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Network or IO failure while reading/writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,
    /// Server returned an error reply.
    #[error("server error: {message}")]
    Server { message: String },
    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,
    /// Pool holds no connections (never initialized or a reset failed).
    #[error("connection pool is not initialized")]
    PoolUninitialized,
    /// Address could not be parsed or resolved.
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Connection was disposed by the pool.
    #[error("connection disposed")]
    Disposed,
    /// Connect did not finish within the configured timeout.
    #[error("connect timed out")]
    ConnectTimeout,
}

impl ConnectionError {
    /// Builds a `Server` error from a raw RESP error payload.
    pub fn server(message: &[u8]) -> Self {
        ConnectionError::Server {
            message: String::from_utf8_lossy(message).into_owned(),
        }
    }
}

/// Codec failures.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn server_error_decodes_payload_lossily() {
        let err = ConnectionError::server(b"ERR wrong type");
        assert_eq!(err.to_string(), "server error: ERR wrong type");
    }

    #[test]
    fn cache_error_keeps_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = CacheError::from(ConnectionError::from(io));
        assert!(err.to_string().starts_with("connection error"));
        assert!(err.source().is_some());
    }
}
