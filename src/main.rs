//! ordkv server binary.
//!
//! Parses the command line, opens the store, and serves clients until
//! Ctrl+C.

use anyhow::Context;
use clap::Parser;
use ordkv::commands::CommandEngine;
use ordkv::config::Config;
use ordkv::server::Server;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &Config) {
    let storage = if config.in_memory {
        "in memory (not persisted)".to_string()
    } else {
        format!("{} (fsync: {:?})", config.path.display(), config.fsync)
    };

    println!(
        r#"
ordkv v{} - Ordered Key-Value Server
──────────────────────────────────────────────────────────────
Listening on {}
Storage:     {}

Use Ctrl+C to shutdown gracefully.
"#,
        ordkv::VERSION,
        config.bind_address(),
        storage
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let store = config
        .open_store()
        .with_context(|| format!("failed to open store at {}", config.path.display()))?;
    info!(keys = store.len(), in_memory = config.in_memory, "Store ready");

    let engine = Arc::new(CommandEngine::standard(Arc::new(store)));
    info!(commands = engine.len(), "Command engine initialized");

    let server = Server::bind(config.bind_address(), engine)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;

    print_banner(&config);

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };
    server.run(shutdown).await;

    info!("Server shutdown complete");
    Ok(())
}
