//! Connection Handler
//!
//! Each client gets its own handler task that runs in a loop, decoding
//! requests and writing back replies.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects
//!        │
//!        ▼
//! 2. ConnectionHandler spawned
//!        │
//!        ▼
//! 3. ┌──────────────────────────────────┐
//!    │  Main Loop                       │
//!    │                                  │
//!    │  decode every complete request   │
//!    │  already in the buffer           │
//!    │        │                         │
//!    │        ▼                         │
//!    │  CommandEngine::execute          │
//!    │  (blocking pool, whole batch)    │
//!    │        │                         │
//!    │        ▼                         │
//!    │  write all replies at once       │
//!    │        │                         │
//!    │        ▼                         │
//!    │  read more bytes, loop back      │
//!    └──────────────────────────────────┘
//!        │
//!        ▼
//! 4. QUIT, client disconnect, or protocol error
//! ```
//!
//! Requests that arrive together (pipelining) are executed as one batch on
//! tokio's blocking pool, since storage calls may wait for the single writer
//! or for a disk sync, and are answered with a single write. Command failures become Error replies and the connection stays
//! open. Malformed wire data gets one final Error reply and then the
//! connection is closed, since the stream can no longer be framed.

use crate::commands::CommandEngine;
use crate::protocol::{decode, ProtocolError, Reply, MAX_BULK_SIZE};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::task::{self, JoinError};
use tracing::{debug, error, info, trace, warn};

/// Maximum bytes buffered for a request that is still incomplete: one
/// maximal bulk string plus room for its framing and other arguments.
pub const MAX_BUFFER_SIZE: usize = MAX_BULK_SIZE + 64 * 1024;

const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics shared by every connection.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// True when `request` is a QUIT command.
fn is_quit(request: &Reply) -> bool {
    match request {
        Reply::Multi(parts) => matches!(
            parts.first(),
            Some(Reply::Bulk(name)) if name.eq_ignore_ascii_case(b"quit")
        ),
        _ => false,
    }
}

/// Requests decoded from one read of the buffer.
#[derive(Debug, Default)]
struct Batch {
    requests: Vec<Reply>,
    /// The last request is a QUIT; anything after it is left undecoded.
    ends_with_quit: bool,
    /// Malformed data found after `requests`.
    error: Option<ProtocolError>,
}

/// Serves one client over any byte stream.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,

    /// Client's address (for logging)
    peer: SocketAddr,

    /// Bytes received but not yet decoded
    buffer: BytesMut,

    engine: Arc<CommandEngine>,

    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: SocketAddr,
        engine: Arc<CommandEngine>,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            peer,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            engine,
            stats,
        }
    }

    /// Serves requests until the client quits or disconnects.
    ///
    /// Returns `Ok(())` after a QUIT.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        debug!(client = %self.peer, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => debug!(client = %self.peer, "Client quit"),
            Err(ConnectionError::ClientDisconnected) => {
                debug!(client = %self.peer, "Client disconnected")
            }
            Err(ConnectionError::Io(io_err))
                if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                debug!(client = %self.peer, "Connection reset by client")
            }
            Err(e) => warn!(client = %self.peer, error = %e, "Connection error"),
        }

        self.stats.connection_closed();
        result
    }

    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            let batch = self.decode_batch();
            let mut out = BytesMut::new();
            let mut quit = false;

            if !batch.requests.is_empty() {
                let replies = self.execute(batch.requests).await?;
                for reply in &replies {
                    self.stats.command_processed();
                    reply.encode(&mut out);
                }
                quit = batch.ends_with_quit && replies.last().is_some_and(|r| !r.is_error());
            }

            if let Some(e) = batch.error {
                warn!(client = %self.peer, error = %e, "Protocol error");
                Reply::error(format!("ERR protocol error: {e}")).encode(&mut out);
                self.send(&out).await?;
                return Err(e.into());
            }

            if !out.is_empty() {
                self.send(&out).await?;
            }
            if quit {
                return Ok(());
            }

            self.read_more_data().await?;
        }
    }

    /// Decodes every complete request in the buffer, stopping after a QUIT
    /// or at malformed data.
    fn decode_batch(&mut self) -> Batch {
        let mut batch = Batch::default();
        loop {
            match decode(&mut self.buffer) {
                Ok(Some(request)) => {
                    let quit = is_quit(&request);
                    batch.requests.push(request);
                    if quit {
                        batch.ends_with_quit = true;
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    batch.error = Some(e);
                    break;
                }
            }
        }
        batch
    }

    /// Runs `requests` in order on the blocking pool.
    async fn execute(&self, requests: Vec<Reply>) -> Result<Vec<Reply>, ConnectionError> {
        let engine = Arc::clone(&self.engine);
        let replies = task::spawn_blocking(move || {
            requests
                .into_iter()
                .map(|request| engine.execute(request))
                .collect::<Vec<_>>()
        })
        .await?;
        Ok(replies)
    }

    /// Reads more data from the stream into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= MAX_BUFFER_SIZE {
            error!(
                client = %self.peer,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            return Err(ConnectionError::BufferFull);
        }

        // Grow geometrically so large values take few reads
        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(self.buffer.len().max(INITIAL_BUFFER_SIZE));
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.bytes_read(n);
        trace!(client = %self.peer, bytes = n, "Read data");
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(client = %self.peer, bytes = bytes.len(), "Sent replies");
        Ok(())
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("client disconnected")]
    ClientDisconnected,

    /// The stream ended in the middle of a request.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("buffer size limit exceeded")]
    BufferFull,

    #[error("command worker failed: {0}")]
    Worker(#[from] JoinError),
}

/// Serves one accepted TCP connection to completion.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    engine: Arc<CommandEngine>,
    stats: Arc<ConnectionStats>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(client = %addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let handler = ConnectionHandler::new(stream, addr, engine, stats);
    match handler.run().await {
        Ok(()) | Err(ConnectionError::ClientDisconnected) => {
            info!(client = %addr, "Connection closed")
        }
        Err(e) => debug!(client = %addr, error = %e, "Connection ended with error"),
    }
}
