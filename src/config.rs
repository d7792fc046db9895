//! Command-line configuration for the `ordkv` binary.

use crate::storage::{FsyncPolicy, StorageResult, Store};
use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;
use std::path::PathBuf;

/// Server configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "ordkv", version)]
#[command(about = "Networked key-value server with ordered range scans")]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Data directory holding the database file
    #[arg(long, default_value = "./data")]
    pub path: PathBuf,

    /// Keep everything in memory. Data is lost on exit.
    #[arg(long)]
    pub in_memory: bool,

    /// When a commit must reach the disk
    #[arg(long, value_enum, default_value_t = FsyncPolicy::Always)]
    pub fsync: FsyncPolicy,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            path: PathBuf::from("./data"),
            in_memory: false,
            fsync: FsyncPolicy::Always,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Opens the store this configuration describes.
    pub fn open_store(&self) -> StorageResult<Store> {
        if self.in_memory {
            Store::in_memory()
        } else {
            Store::open(&self.path, self.fsync)
        }
    }
}
