//! # ordkv - A Networked Ordered Key-Value Store
//!
//! ordkv keeps binary keys in sorted order and serves them over a
//! Redis-style text protocol. Besides point reads and writes it answers
//! ordered range scans in both directions, bit operations on values, and
//! atomic counters.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                ordkv                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │                  │
//! │  │ (Listener)  │    │  Handler    │    │  Engine     │                  │
//! │  └─────────────┘    └──────┬──────┘    └──────┬──────┘                  │
//! │                            │                  │                         │
//! │                            ▼                  ▼                         │
//! │                     ┌─────────────┐    ┌──────────────────────────────┐ │
//! │                     │  Protocol   │    │            Store             │ │
//! │                     │  decode /   │    │  transactions  snapshots     │ │
//! │                     │  encode     │    │  one writer    cursors       │ │
//! │                     └─────────────┘    └──────────────┬───────────────┘ │
//! │                                                       │ commit          │
//! │                                                       ▼                 │
//! │                                             ┌──────────────────┐        │
//! │                                             │ redb ordkv.redb  │        │
//! │                                             └──────────────────┘        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use ordkv::commands::CommandEngine;
//! use ordkv::server::Server;
//! use ordkv::storage::{FsyncPolicy, Store};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(Store::open("./data", FsyncPolicy::Always)?);
//!     let engine = Arc::new(CommandEngine::standard(store));
//!
//!     let server = Server::bind("127.0.0.1:10008", engine).await?;
//!     server.run(async { let _ = tokio::signal::ctrl_c().await; }).await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: Wire format decoder and reply encoder
//! - [`storage`]: Ordered store with transactions, snapshots and cursors on redb
//! - [`commands`]: Command registry and handlers
//! - [`connection`]: Per-client request loop
//! - [`server`]: Listener and accept loop
//! - [`client`]: Async client used by tests and tools
//! - [`config`]: Command-line configuration
//!
//! ## Design Highlights
//!
//! ### MVCC snapshots
//!
//! Data lives in a redb table. A snapshot is a redb read transaction, so it
//! never blocks writers and never sees a later commit.
//!
//! ### Serialized writers
//!
//! At most one transaction is open at a time. Read-modify-write commands
//! such as INCR and APPEND run inside one, so concurrent clients never
//! lose updates.
//!
//! ### Blocking work off the reactor
//!
//! Commands may wait for the single writer or for a disk sync, so each
//! connection runs its decoded requests on tokio's blocking pool.
//!
//! ### Durable commits
//!
//! redb commits through checksummed pages and a two-slot header. With
//! `--fsync always` a success reply means the write is on disk.

pub mod client;
pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod server;
pub mod storage;

// Re-export commonly used types for convenience
pub use client::{Client, ClientError};
pub use commands::{CommandEngine, CommandError};
pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{ProtocolError, Reply};
pub use server::Server;
pub use storage::{FsyncPolicy, KeyRange, Snapshot, StorageError, Store, Transaction};

/// The default port ordkv listens on
pub const DEFAULT_PORT: u16 = 10008;

/// The default host ordkv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of ordkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
