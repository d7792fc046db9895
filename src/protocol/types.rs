//! Reply Types
//!
//! Every value that crosses the wire is a [`Reply`]. Requests arrive as a
//! `Multi` of `Bulk` values (`[name, arg1, arg2, ...]`) and every command
//! answers with one of the five reply kinds below.
//!
//! ## Wire Format
//!
//! Each kind starts with a one-byte prefix and every header line ends in CRLF:
//!
//! | Kind    | Example                         |
//! |---------|---------------------------------|
//! | Status  | `+OK\r\n`                       |
//! | Error   | `-ERR no such key\r\n`          |
//! | Integer | `:1000\r\n`                     |
//! | Bulk    | `$5\r\nhello\r\n`               |
//! | Nil     | `$-1\r\n`                       |
//! | Multi   | `*2\r\n$3\r\nGET\r\n$1\r\nk\r\n` |

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// The CRLF terminator used by every header line.
pub const CRLF: &[u8] = b"\r\n";

/// Type prefixes.
pub mod prefix {
    pub const STATUS: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK: u8 = b'$';
    pub const MULTI: u8 = b'*';
}

/// A single protocol value, used for both requests and replies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Short fixed text such as `OK` or `PONG`. Must not contain CRLF.
    Status(String),

    /// An error message. The connection stays open after sending one.
    Error(String),

    /// A signed 64-bit integer rendered as decimal text.
    Integer(i64),

    /// A binary-safe byte string.
    Bulk(Bytes),

    /// The absent bulk string (`$-1`). Also produced for a null multi.
    Nil,

    /// An ordered sequence of replies.
    Multi(Vec<Reply>),
}

impl Reply {
    pub fn status(s: impl Into<String>) -> Self {
        Reply::Status(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        Reply::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        Reply::Integer(n)
    }

    /// Creates a bulk reply.
    ///
    /// # Example
    /// ```
    /// use ordkv::protocol::Reply;
    /// use bytes::Bytes;
    /// let bulk = Reply::bulk(Bytes::from("hello"));
    /// assert_eq!(bulk.serialize(), b"$5\r\nhello\r\n");
    /// ```
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Reply::Bulk(data.into())
    }

    pub fn multi(values: Vec<Reply>) -> Self {
        Reply::Multi(values)
    }

    pub fn ok() -> Self {
        Reply::Status("OK".to_string())
    }

    pub fn pong() -> Self {
        Reply::Status("PONG".to_string())
    }

    /// Builds the request form of a command: a `Multi` of `Bulk` values.
    pub fn request<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        Reply::Multi(parts.into_iter().map(|p| Reply::Bulk(p.into())).collect())
    }

    /// Encodes the value into a fresh buffer.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }

    /// Appends the wire form of the value to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Reply::Status(s) => {
                buf.put_u8(prefix::STATUS);
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Error(s) => {
                buf.put_u8(prefix::ERROR);
                buf.put_slice(s.as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Integer(n) => {
                buf.put_u8(prefix::INTEGER);
                buf.put_slice(n.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            Reply::Bulk(data) => {
                buf.reserve(data.len() + 16);
                buf.put_u8(prefix::BULK);
                buf.put_slice(data.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            Reply::Nil => buf.put_slice(b"$-1\r\n"),
            Reply::Multi(values) => {
                buf.put_u8(prefix::MULTI);
                buf.put_slice(values.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for value in values {
                    value.encode(buf);
                }
            }
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Returns the payload of a `Bulk` value.
    pub fn as_bulk(&self) -> Option<&Bytes> {
        match self {
            Reply::Bulk(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Consumes the value and returns the elements of a `Multi`.
    pub fn into_multi(self) -> Option<Vec<Reply>> {
        match self {
            Reply::Multi(values) => Some(values),
            _ => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Error(s) => write!(f, "(error) {}", s),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            Reply::Nil => write!(f, "(nil)"),
            Reply::Multi(values) => {
                if values.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
        }
    }
}
