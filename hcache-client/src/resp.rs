//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server responses incrementally
//! from a growable read buffer, so a partial frame simply waits for more bytes.
//!
//! ## Design Principles
//! 1. **Peek Then Consume**: A frame is parsed against a borrowed slice and the
//!    buffer is only advanced once the whole frame is present.
//! 2. **Buffer Reuse**: Callers own the write and read buffers.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use bytes::{Buf, BytesMut};

use hcache_common::{ClientResult, ConnectionError};

/// Largest bulk string accepted from the wire (512 MiB, the server default).
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// Deepest array nesting accepted from the wire.
const MAX_DEPTH: usize = 32;

/// RESP response value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style responses.
    Simple(Vec<u8>),
    /// -ERR ... responses.
    Error(Vec<u8>),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays.
    Array(Vec<RespValue>),
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    push_len(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        push_len(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Parses one complete RESP value from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed; the buffer is untouched in
/// that case.
pub fn parse_response(buf: &mut BytesMut) -> ClientResult<Option<RespValue>> {
    match parse_value(&buf[..], 0, 0)? {
        Some((value, consumed)) => {
            buf.advance(consumed);
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

fn parse_value(data: &[u8], pos: usize, depth: usize) -> ClientResult<Option<(RespValue, usize)>> {
    if depth > MAX_DEPTH {
        return Err(ConnectionError::Protocol);
    }
    let Some((line, next)) = read_line(data, pos)? else {
        return Ok(None);
    };
    if line.is_empty() {
        return Err(ConnectionError::Protocol);
    }

    match line[0] {
        b'+' => Ok(Some((RespValue::Simple(line[1..].to_vec()), next))),
        b'-' => Ok(Some((RespValue::Error(line[1..].to_vec()), next))),
        b':' => Ok(Some((RespValue::Integer(parse_i64(&line[1..])?), next))),
        b'$' => {
            let len = parse_i64(&line[1..])?;
            parse_bulk(data, next, len)
        }
        b'*' => {
            let len = parse_i64(&line[1..])?;
            parse_array(data, next, len, depth)
        }
        _ => Err(ConnectionError::Protocol),
    }
}

fn parse_bulk(data: &[u8], pos: usize, len: i64) -> ClientResult<Option<(RespValue, usize)>> {
    if len < 0 {
        return Ok(Some((RespValue::Bulk(None), pos)));
    }
    let len = usize::try_from(len).map_err(|_| ConnectionError::Protocol)?;
    if len > MAX_BULK_LEN {
        return Err(ConnectionError::Protocol);
    }
    let end = pos + len;
    if data.len() < end + 2 {
        return Ok(None);
    }
    if &data[end..end + 2] != b"\r\n" {
        return Err(ConnectionError::Protocol);
    }
    Ok(Some((RespValue::Bulk(Some(data[pos..end].to_vec())), end + 2)))
}

fn parse_array(
    data: &[u8],
    mut pos: usize,
    len: i64,
    depth: usize,
) -> ClientResult<Option<(RespValue, usize)>> {
    if len <= 0 {
        return Ok(Some((RespValue::Array(Vec::new()), pos)));
    }

    // Every element takes at least three bytes, so the buffer bounds the allocation.
    let remaining = data.len().saturating_sub(pos) / 3;
    let mut items = Vec::with_capacity(usize::try_from(len).unwrap_or(usize::MAX).min(remaining));
    for _ in 0..len {
        match parse_value(data, pos, depth + 1)? {
            Some((item, next)) => {
                items.push(item);
                pos = next;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((RespValue::Array(items), pos)))
}

/// Returns the line starting at `pos` without its CRLF, and the offset after it.
fn read_line(data: &[u8], pos: usize) -> ClientResult<Option<(&[u8], usize)>> {
    let rest = &data[pos..];
    let Some(lf) = rest.iter().position(|&b| b == b'\n') else {
        return Ok(None);
    };
    if lf == 0 || rest[lf - 1] != b'\r' {
        return Err(ConnectionError::Protocol);
    }
    Ok(Some((&rest[..lf - 1], pos + lf + 1)))
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    if data.is_empty() {
        return Err(ConnectionError::Protocol);
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(ConnectionError::Protocol);
    }

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ConnectionError::Protocol);
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }

    Ok(if negative { -value } else { value })
}

fn push_len(out: &mut Vec<u8>, len: usize) {
    let (digits, used) = encode_u64(len as u64);
    out.extend_from_slice(&digits[..used]);
}

/// Formats an unsigned integer as an ASCII argument.
pub(crate) fn encode_u64(mut value: u64) -> ([u8; 20], usize) {
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        return (buf, 1);
    }
    while value > 0 {
        buf[len] = b'0' + (value % 10) as u8;
        value /= 10;
        len += 1;
    }
    buf[..len].reverse();
    (buf, len)
}
