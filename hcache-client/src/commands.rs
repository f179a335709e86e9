//! # Typed Commands
//!
//! Purpose: Map the handful of commands the cache needs onto RESP requests
//! and validate the reply shape of each.

use std::time::Duration;

use hcache_common::{ClientResult, ConnectionError};

use crate::connection::TransportConnection;
use crate::pool::ConnectionHandle;
use crate::resp::{encode_u64, RespValue};

/// Conditional write mode for `SET`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    Always,
    /// `NX`: only when the key does not exist.
    IfAbsent,
}

impl<C: TransportConnection> ConnectionHandle<C> {
    /// Fetches a value by key. Returns `Ok(None)` when the key is missing.
    pub async fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.exec(&[b"GET", key]).await? {
            RespValue::Bulk(data) => Ok(data),
            RespValue::Error(message) => Err(ConnectionError::server(&message)),
            _ => Err(ConnectionError::UnexpectedResponse),
        }
    }

    /// Sets a value with an expiration in whole seconds (minimum one).
    ///
    /// Returns false when `IfAbsent` skipped the write because the key exists.
    pub async fn set_with_ttl(
        &self,
        key: &[u8],
        value: &[u8],
        ttl: Duration,
        condition: SetCondition,
    ) -> ClientResult<bool> {
        let (seconds, len) = encode_u64(ttl.as_secs().max(1));
        let reply = match condition {
            SetCondition::Always => self.exec(&[b"SET", key, value, b"EX", &seconds[..len]]).await?,
            SetCondition::IfAbsent => {
                self.exec(&[b"SET", key, value, b"EX", &seconds[..len], b"NX"])
                    .await?
            }
        };
        match reply {
            RespValue::Simple(_) => Ok(true),
            RespValue::Bulk(None) => Ok(false),
            RespValue::Error(message) => Err(ConnectionError::server(&message)),
            _ => Err(ConnectionError::UnexpectedResponse),
        }
    }

    /// Deletes keys in one request. Returns how many existed.
    pub async fn delete(&self, keys: &[&[u8]]) -> ClientResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"DEL");
        args.extend_from_slice(keys);
        match self.exec(&args).await? {
            RespValue::Integer(count) => Ok(count.max(0) as u64),
            RespValue::Error(message) => Err(ConnectionError::server(&message)),
            _ => Err(ConnectionError::UnexpectedResponse),
        }
    }

    /// Pings the server. Returns the raw response payload.
    pub async fn ping(&self) -> ClientResult<Vec<u8>> {
        match self.exec(&[b"PING"]).await? {
            RespValue::Simple(text) => Ok(text),
            RespValue::Bulk(Some(data)) => Ok(data),
            RespValue::Error(message) => Err(ConnectionError::server(&message)),
            _ => Err(ConnectionError::UnexpectedResponse),
        }
    }
}
