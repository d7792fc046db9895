//! Async Client
//!
//! A thin client over one TCP connection. Every helper sends a single
//! request, waits for its reply and converts it to a Rust type. Error
//! replies come back as [`ClientError::Server`] carrying the server's text.
//!
//! ```ignore
//! let mut client = Client::connect("127.0.0.1:10008").await?;
//! client.set("user:1", "ariz").await?;
//! let keys = client.keys("user:", "user:~", -1).await?;
//! ```

use crate::protocol::{decode, ProtocolError, Reply};
use bytes::{Bytes, BytesMut};
use std::io;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::trace;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{0}")]
    Server(String),

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("connection closed by server")]
    Closed,
}

impl ClientError {
    fn unexpected(reply: &Reply) -> Self {
        ClientError::UnexpectedReply(reply.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

pub struct Client {
    stream: TcpStream,
    buffer: BytesMut,
}

impl Client {
    /// Connects and checks the server answers PING.
    pub async fn connect(addr: impl ToSocketAddrs) -> ClientResult<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        let mut client = Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
        };
        client.ping().await?;
        Ok(client)
    }

    /// Sends one command and returns its reply. Error replies become
    /// [`ClientError::Server`].
    pub async fn execute<I>(&mut self, args: I) -> ClientResult<Reply>
    where
        I: IntoIterator,
        I::Item: AsRef<[u8]>,
    {
        let request = Reply::request(
            args.into_iter()
                .map(|arg| Bytes::copy_from_slice(arg.as_ref())),
        );
        trace!(request = %request, "Sending");

        let mut out = BytesMut::new();
        request.encode(&mut out);
        self.stream.write_all(&out).await?;

        match self.read_reply().await? {
            Reply::Error(message) => Err(ClientError::Server(message)),
            reply => Ok(reply),
        }
    }

    async fn read_reply(&mut self) -> ClientResult<Reply> {
        loop {
            if let Some(reply) = decode(&mut self.buffer)? {
                return Ok(reply);
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(ClientError::Closed);
            }
        }
    }

    // ========================================================================
    // Server
    // ========================================================================

    pub async fn ping(&mut self) -> ClientResult<()> {
        let reply = self.execute([&b"PING"[..]]).await?;
        match reply {
            Reply::Status(ref s) if s == "PONG" => Ok(()),
            other => Err(ClientError::unexpected(&other)),
        }
    }

    pub async fn echo(&mut self, message: impl AsRef<[u8]>) -> ClientResult<Bytes> {
        let reply = self.execute([&b"ECHO"[..], message.as_ref()]).await?;
        expect_bulk(reply)
    }

    /// Server wall-clock time.
    pub async fn time(&mut self) -> ClientResult<SystemTime> {
        let reply = self.execute([&b"TIME"[..]]).await?;
        match reply.into_multi().as_deref() {
            Some([Reply::Integer(secs), Reply::Integer(nanos)]) if *secs >= 0 && *nanos >= 0 => {
                Ok(UNIX_EPOCH + Duration::new(*secs as u64, *nanos as u32))
            }
            _ => Err(ClientError::UnexpectedReply("malformed TIME reply".to_string())),
        }
    }

    pub async fn info(&mut self) -> ClientResult<String> {
        let reply = self.execute([&b"INFO"[..]]).await?;
        let text = expect_bulk(reply)?;
        Ok(String::from_utf8_lossy(&text).into_owned())
    }

    /// Asks the server to close the connection and consumes the client.
    pub async fn quit(mut self) -> ClientResult<()> {
        let reply = self.execute([&b"QUIT"[..]]).await?;
        expect_ok(reply)
    }

    // ========================================================================
    // Keys and values
    // ========================================================================

    pub async fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> ClientResult<()> {
        let reply = self
            .execute([&b"SET"[..], key.as_ref(), value.as_ref()])
            .await?;
        expect_ok(reply)
    }

    /// Fails with [`ClientError::Server`] when the key is missing.
    pub async fn get(&mut self, key: impl AsRef<[u8]>) -> ClientResult<Bytes> {
        let reply = self.execute([&b"GET"[..], key.as_ref()]).await?;
        expect_bulk(reply)
    }

    /// Stores `value` and returns the previous value, empty if there was none.
    pub async fn getset(
        &mut self,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> ClientResult<Bytes> {
        let reply = self
            .execute([&b"GETSET"[..], key.as_ref(), value.as_ref()])
            .await?;
        expect_bulk(reply)
    }

    pub async fn mset<K, V>(&mut self, pairs: &[(K, V)]) -> ClientResult<()>
    where
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let mut args: Vec<&[u8]> = Vec::with_capacity(1 + pairs.len() * 2);
        args.push(b"MSET");
        for (key, value) in pairs {
            args.push(key.as_ref());
            args.push(value.as_ref());
        }
        let reply = self.execute(args).await?;
        expect_ok(reply)
    }

    /// Returns how many of `keys` existed and were removed.
    pub async fn del<K: AsRef<[u8]>>(&mut self, keys: &[K]) -> ClientResult<i64> {
        let reply = self.execute(with_name(b"DEL", keys)).await?;
        expect_integer(reply)
    }

    pub async fn exists<K: AsRef<[u8]>>(&mut self, keys: &[K]) -> ClientResult<i64> {
        let reply = self.execute(with_name(b"EXISTS", keys)).await?;
        expect_integer(reply)
    }

    pub async fn rename(&mut self, from: impl AsRef<[u8]>, to: impl AsRef<[u8]>) -> ClientResult<()> {
        let reply = self
            .execute([&b"RENAME"[..], from.as_ref(), to.as_ref()])
            .await?;
        expect_ok(reply)
    }

    /// Returns the new length.
    pub async fn append(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> ClientResult<i64> {
        let reply = self
            .execute([&b"APPEND"[..], key.as_ref(), value.as_ref()])
            .await?;
        expect_integer(reply)
    }

    pub async fn strlen(&mut self, key: impl AsRef<[u8]>) -> ClientResult<i64> {
        let reply = self.execute([&b"STRLEN"[..], key.as_ref()]).await?;
        expect_integer(reply)
    }

    pub async fn incr(&mut self, key: impl AsRef<[u8]>) -> ClientResult<i64> {
        let reply = self.execute([&b"INCR"[..], key.as_ref()]).await?;
        expect_integer(reply)
    }

    pub async fn incrby(&mut self, key: impl AsRef<[u8]>, delta: i64) -> ClientResult<i64> {
        let delta = delta.to_string();
        let reply = self
            .execute([&b"INCRBY"[..], key.as_ref(), delta.as_bytes()])
            .await?;
        expect_integer(reply)
    }

    // ========================================================================
    // Bits
    // ========================================================================

    pub async fn getbit(&mut self, key: impl AsRef<[u8]>, offset: u64) -> ClientResult<i64> {
        let offset = offset.to_string();
        let reply = self
            .execute([&b"GETBIT"[..], key.as_ref(), offset.as_bytes()])
            .await?;
        expect_integer(reply)
    }

    /// Returns the bit's previous value.
    pub async fn setbit(&mut self, key: impl AsRef<[u8]>, offset: u64, on: bool) -> ClientResult<i64> {
        let offset = offset.to_string();
        let bit: &[u8] = if on { b"1" } else { b"0" };
        let reply = self
            .execute([&b"SETBIT"[..], key.as_ref(), offset.as_bytes(), bit])
            .await?;
        expect_integer(reply)
    }

    pub async fn bitcount(&mut self, key: impl AsRef<[u8]>) -> ClientResult<i64> {
        let reply = self.execute([&b"BITCOUNT"[..], key.as_ref()]).await?;
        expect_integer(reply)
    }

    /// Counts set bits in the inclusive byte range `start..=end`. Negative
    /// indexes count from the end.
    pub async fn bitcount_range(
        &mut self,
        key: impl AsRef<[u8]>,
        start: i64,
        end: i64,
    ) -> ClientResult<i64> {
        let (start, end) = (start.to_string(), end.to_string());
        let reply = self
            .execute([
                &b"BITCOUNT"[..],
                key.as_ref(),
                start.as_bytes(),
                end.as_bytes(),
            ])
            .await?;
        expect_integer(reply)
    }

    // ========================================================================
    // Ranges
    // ========================================================================

    /// Keys in `(start, end]`, ascending. An empty bound is open and a
    /// negative limit means no limit.
    pub async fn keys(
        &mut self,
        start: impl AsRef<[u8]>,
        end: impl AsRef<[u8]>,
        limit: i64,
    ) -> ClientResult<Vec<Bytes>> {
        self.range_keys(b"KEYS", start.as_ref(), end.as_ref(), limit)
            .await
    }

    /// Like [`Client::keys`] but descending.
    pub async fn rkeys(
        &mut self,
        start: impl AsRef<[u8]>,
        end: impl AsRef<[u8]>,
        limit: i64,
    ) -> ClientResult<Vec<Bytes>> {
        self.range_keys(b"RKEYS", start.as_ref(), end.as_ref(), limit)
            .await
    }

    pub async fn scan(
        &mut self,
        start: impl AsRef<[u8]>,
        end: impl AsRef<[u8]>,
        limit: i64,
    ) -> ClientResult<Vec<(Bytes, Bytes)>> {
        self.range_pairs(b"SCAN", start.as_ref(), end.as_ref(), limit)
            .await
    }

    pub async fn rscan(
        &mut self,
        start: impl AsRef<[u8]>,
        end: impl AsRef<[u8]>,
        limit: i64,
    ) -> ClientResult<Vec<(Bytes, Bytes)>> {
        self.range_pairs(b"RSCAN", start.as_ref(), end.as_ref(), limit)
            .await
    }

    async fn range_keys(
        &mut self,
        command: &[u8],
        start: &[u8],
        end: &[u8],
        limit: i64,
    ) -> ClientResult<Vec<Bytes>> {
        let limit = limit.to_string();
        let reply = self
            .execute([command, start, end, limit.as_bytes()])
            .await?;
        expect_bulks(reply)
    }

    async fn range_pairs(
        &mut self,
        command: &[u8],
        start: &[u8],
        end: &[u8],
        limit: i64,
    ) -> ClientResult<Vec<(Bytes, Bytes)>> {
        let flat = self.range_keys(command, start, end, limit).await?;
        if flat.len() % 2 != 0 {
            return Err(ClientError::UnexpectedReply(
                "odd number of entries in scan reply".to_string(),
            ));
        }

        let mut pairs = Vec::with_capacity(flat.len() / 2);
        let mut entries = flat.into_iter();
        while let (Some(key), Some(value)) = (entries.next(), entries.next()) {
            pairs.push((key, value));
        }
        Ok(pairs)
    }
}

fn with_name<'a, K: AsRef<[u8]>>(name: &'a [u8], keys: &'a [K]) -> Vec<&'a [u8]> {
    std::iter::once(name)
        .chain(keys.iter().map(|k| k.as_ref()))
        .collect()
}

fn expect_ok(reply: Reply) -> ClientResult<()> {
    match reply {
        Reply::Status(ref s) if s == "OK" => Ok(()),
        other => Err(ClientError::unexpected(&other)),
    }
}

fn expect_integer(reply: Reply) -> ClientResult<i64> {
    reply
        .as_integer()
        .ok_or_else(|| ClientError::unexpected(&reply))
}

fn expect_bulk(reply: Reply) -> ClientResult<Bytes> {
    match reply {
        Reply::Bulk(data) => Ok(data),
        other => Err(ClientError::unexpected(&other)),
    }
}

fn expect_bulks(reply: Reply) -> ClientResult<Vec<Bytes>> {
    match reply {
        Reply::Multi(items) => items.into_iter().map(expect_bulk).collect(),
        other => Err(ClientError::unexpected(&other)),
    }
}
