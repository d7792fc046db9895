//! Incremental Request Decoder
//!
//! Decoding happens in two passes over the connection's `BytesMut` buffer:
//!
//! 1. [`frame_len`] walks the buffered bytes and reports how long the first
//!    complete value is, or `None` when more input is needed. Nothing is
//!    consumed and nothing is allocated during this pass.
//! 2. Once a full frame is known, it is split off the buffer and frozen, and
//!    [`read_value`] builds the [`Reply`] tree. Bulk payloads are slices of
//!    the frozen frame, so no payload bytes are copied.
//!
//! Lines that do not start with a type prefix are treated as inline
//! commands (`SET k v\r\n`), which keeps the server usable from telnet.

use crate::protocol::types::{prefix, Reply, CRLF};
use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Errors raised for malformed wire data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid integer: {0:?}")]
    InvalidInteger(String),

    #[error("invalid UTF-8 in simple string")]
    InvalidUtf8,

    #[error("invalid bulk length: {0}")]
    InvalidBulkLength(i64),

    #[error("invalid multi length: {0}")]
    InvalidMultiLength(i64),

    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    #[error("bulk string missing trailing CRLF")]
    MissingCrlf,

    #[error("bulk string too large: {size} bytes (max: {max})")]
    TooLarge { size: usize, max: usize },

    #[error("maximum nesting depth exceeded: {0}")]
    TooDeep(usize),

    #[error("empty inline command")]
    EmptyInline,

    #[error("frame ended unexpectedly")]
    Truncated,
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Maximum size of a single bulk string (512 MB).
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum multi nesting depth.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Decodes the first complete value in `buf`, consuming its bytes.
///
/// Returns `Ok(None)` and leaves `buf` untouched when the value is not yet
/// complete.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use ordkv::protocol::{decode, Reply};
///
/// let mut buf = BytesMut::from(&b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n+OK"[..]);
/// let value = decode(&mut buf).unwrap().unwrap();
/// assert_eq!(value, Reply::request(["GET", "name"]));
/// assert_eq!(&buf[..], b"+OK");
/// assert!(decode(&mut buf).unwrap().is_none());
/// ```
pub fn decode(buf: &mut BytesMut) -> ProtocolResult<Option<Reply>> {
    let len = match frame_len(buf, 0, 0)? {
        Some(len) => len,
        None => return Ok(None),
    };

    let frame = buf.split_to(len).freeze();
    let mut pos = 0;
    read_value(&frame, &mut pos, true).map(Some)
}

/// Finds the next CRLF at or after `from`.
#[inline]
fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == CRLF)
        .map(|i| from + i)
}

/// Returns the header line after the prefix byte at `pos` and the position
/// just past its CRLF.
#[inline]
fn header(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let end = find_crlf(buf, pos + 1)?;
    Some((&buf[pos + 1..end], end + 2))
}

fn parse_int(line: &[u8]) -> ProtocolResult<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ProtocolError::InvalidInteger(String::from_utf8_lossy(line).into_owned()))
}

fn bulk_len(n: i64) -> ProtocolResult<usize> {
    if n < 0 {
        return Err(ProtocolError::InvalidBulkLength(n));
    }
    let size = n as usize;
    if size > MAX_BULK_SIZE {
        return Err(ProtocolError::TooLarge {
            size,
            max: MAX_BULK_SIZE,
        });
    }
    Ok(size)
}

/// First pass: the end position of the value starting at `pos`.
fn frame_len(buf: &[u8], pos: usize, depth: usize) -> ProtocolResult<Option<usize>> {
    if depth > MAX_NESTING_DEPTH {
        return Err(ProtocolError::TooDeep(MAX_NESTING_DEPTH));
    }

    let tag = match buf.get(pos) {
        Some(&tag) => tag,
        None => return Ok(None),
    };

    match tag {
        prefix::STATUS | prefix::ERROR | prefix::INTEGER => {
            let (line, next) = match header(buf, pos) {
                Some(h) => h,
                None => return Ok(None),
            };
            if tag == prefix::INTEGER {
                parse_int(line)?;
            } else if std::str::from_utf8(line).is_err() {
                return Err(ProtocolError::InvalidUtf8);
            }
            Ok(Some(next))
        }
        prefix::BULK => {
            let (line, next) = match header(buf, pos) {
                Some(h) => h,
                None => return Ok(None),
            };
            let n = parse_int(line)?;
            if n == -1 {
                return Ok(Some(next));
            }
            let end = next + bulk_len(n)?;
            if buf.len() < end + 2 {
                return Ok(None);
            }
            if &buf[end..end + 2] != CRLF {
                return Err(ProtocolError::MissingCrlf);
            }
            Ok(Some(end + 2))
        }
        prefix::MULTI => {
            let (line, mut next) = match header(buf, pos) {
                Some(h) => h,
                None => return Ok(None),
            };
            let n = parse_int(line)?;
            if n == -1 {
                return Ok(Some(next));
            }
            if n < 0 {
                return Err(ProtocolError::InvalidMultiLength(n));
            }
            for _ in 0..n {
                match frame_len(buf, next, depth + 1)? {
                    Some(end) => next = end,
                    None => return Ok(None),
                }
            }
            Ok(Some(next))
        }
        other if depth > 0 => Err(ProtocolError::UnknownPrefix(other)),
        _ => Ok(find_crlf(buf, pos).map(|end| end + 2)),
    }
}

/// Second pass: builds the value at `pos` from a frame known to be complete.
fn read_value(frame: &Bytes, pos: &mut usize, top_level: bool) -> ProtocolResult<Reply> {
    let tag = *frame.get(*pos).ok_or(ProtocolError::Truncated)?;

    let (line, next) = match tag {
        prefix::STATUS | prefix::ERROR | prefix::INTEGER | prefix::BULK | prefix::MULTI => {
            header(frame, *pos).ok_or(ProtocolError::Truncated)?
        }
        _ if top_level => return read_inline(frame, pos),
        other => return Err(ProtocolError::UnknownPrefix(other)),
    };
    *pos = next;

    match tag {
        prefix::STATUS | prefix::ERROR => {
            let text = std::str::from_utf8(line)
                .map_err(|_| ProtocolError::InvalidUtf8)?
                .to_string();
            Ok(if tag == prefix::STATUS {
                Reply::Status(text)
            } else {
                Reply::Error(text)
            })
        }
        prefix::INTEGER => parse_int(line).map(Reply::Integer),
        prefix::BULK => {
            let n = parse_int(line)?;
            if n == -1 {
                return Ok(Reply::Nil);
            }
            let start = *pos;
            let end = start + bulk_len(n)?;
            if frame.len() < end + 2 {
                return Err(ProtocolError::Truncated);
            }
            *pos = end + 2;
            Ok(Reply::Bulk(frame.slice(start..end)))
        }
        _ => {
            let n = parse_int(line)?;
            if n == -1 {
                return Ok(Reply::Nil);
            }
            if n < 0 {
                return Err(ProtocolError::InvalidMultiLength(n));
            }
            let mut values = Vec::with_capacity(n as usize);
            for _ in 0..n {
                values.push(read_value(frame, pos, false)?);
            }
            Ok(Reply::Multi(values))
        }
    }
}

/// Reads a whitespace-separated inline command into a `Multi` of `Bulk`.
fn read_inline(frame: &Bytes, pos: &mut usize) -> ProtocolResult<Reply> {
    let end = find_crlf(frame, *pos).ok_or(ProtocolError::Truncated)?;
    let line = &frame[*pos..end];
    *pos = end + 2;

    let parts: Vec<Reply> = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| Reply::Bulk(frame.slice_ref(part)))
        .collect();

    if parts.is_empty() {
        return Err(ProtocolError::EmptyInline);
    }
    Ok(Reply::Multi(parts))
}
