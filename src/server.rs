//! TCP Server
//!
//! Owns the listener and spawns one [`ConnectionHandler`] task per client.
//! The command engine and connection statistics are shared by every task.
//!
//! [`ConnectionHandler`]: crate::connection::ConnectionHandler

use crate::commands::CommandEngine;
use crate::connection::{handle_connection, ConnectionStats};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{error, info};

pub struct Server {
    listener: TcpListener,
    engine: Arc<CommandEngine>,
    stats: Arc<ConnectionStats>,
}

impl Server {
    /// Binds the listener. Port 0 picks a free port.
    pub async fn bind(addr: impl ToSocketAddrs, engine: Arc<CommandEngine>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            engine,
            stats: Arc::new(ConnectionStats::new()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    /// Accepts connections until `shutdown` completes.
    ///
    /// Connections that are already open keep being served by their own
    /// tasks for as long as the runtime lives.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        if let Ok(addr) = self.local_addr() {
            info!(addr = %addr, "Listening");
        }

        tokio::select! {
            _ = accept_loop(self.listener, self.engine, self.stats) => {}
            _ = shutdown => {
                info!("Shutdown signal received, no longer accepting connections");
            }
        }
    }
}

/// Main loop that accepts incoming connections
async fn accept_loop(
    listener: TcpListener,
    engine: Arc<CommandEngine>,
    stats: Arc<ConnectionStats>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let engine = Arc::clone(&engine);
                let stats = Arc::clone(&stats);
                tokio::spawn(handle_connection(stream, addr, engine, stats));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Store;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    async fn start() -> (SocketAddr, Arc<ConnectionStats>, oneshot::Sender<()>) {
        let engine = Arc::new(CommandEngine::standard(Arc::new(Store::in_memory().unwrap())));
        let server = Server::bind("127.0.0.1:0", engine).await.unwrap();
        let addr = server.local_addr().unwrap();
        let stats = server.stats();

        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(server.run(async move {
            let _ = rx.await;
        }));
        (addr, stats, tx)
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let (addr, _, _shutdown) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+PONG\r\n");
    }

    #[tokio::test]
    async fn test_connection_stats() {
        let (addr, stats, _shutdown) = start().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let _ = client.read(&mut buf).await.unwrap();

        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 1);
        assert!(stats.commands_processed.load(Ordering::Relaxed) >= 1);

        drop(client);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let (addr, _, shutdown) = start().await;
        shutdown.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(TcpStream::connect(addr).await.is_err());
    }
}
