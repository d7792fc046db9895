//! Commands that do not touch keys: PING, ECHO, TIME, QUIT and INFO.

use crate::commands::error::{CommandError, CommandResult};
use crate::protocol::Reply;
use crate::storage::{FsyncPolicy, Store};
use bytes::Bytes;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// PING [message]
pub fn ping(name: &str, args: &[Bytes]) -> CommandResult {
    match args {
        [] => Ok(Reply::pong()),
        [message] => Ok(Reply::Bulk(message.clone())),
        _ => Err(CommandError::wrong_arity(name)),
    }
}

/// ECHO message
pub fn echo(name: &str, args: &[Bytes]) -> CommandResult {
    match args {
        [message] => Ok(Reply::Bulk(message.clone())),
        _ => Err(CommandError::wrong_arity(name)),
    }
}

/// TIME
///
/// Replies with `[unix seconds, nanoseconds within the second]`.
pub fn time(name: &str, args: &[Bytes]) -> CommandResult {
    if !args.is_empty() {
        return Err(CommandError::wrong_arity(name));
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    Ok(Reply::multi(vec![
        Reply::integer(now.as_secs() as i64),
        Reply::integer(now.subsec_nanos() as i64),
    ]))
}

/// QUIT
///
/// Only acknowledges. The connection closes itself after sending the reply.
pub fn quit(name: &str, args: &[Bytes]) -> CommandResult {
    if !args.is_empty() {
        return Err(CommandError::wrong_arity(name));
    }
    Ok(Reply::ok())
}

/// INFO [section]
///
/// Renders the storage engine's counters. The section argument is accepted
/// but every section is always returned.
pub struct Info {
    store: Arc<Store>,
    started: Instant,
}

impl Info {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            started: Instant::now(),
        }
    }

    pub fn call(&self, name: &str, args: &[Bytes]) -> CommandResult {
        if args.len() > 1 {
            return Err(CommandError::wrong_arity(name));
        }
        Ok(Reply::Bulk(Bytes::from(self.render())))
    }

    fn render(&self) -> String {
        let stats = self.store.stats();
        let fsync = match self.store.policy() {
            FsyncPolicy::Always => "always",
            FsyncPolicy::Eventual => "eventual",
        };
        let mut out = String::new();

        let _ = write!(
            out,
            "# Server\r\n\
             ordkv_version:{}\r\n\
             os:{}\r\n\
             uptime_in_seconds:{}\r\n\
             \r\n\
             # Keyspace\r\n\
             keys:{}\r\n\
             \r\n\
             # Storage\r\n\
             backend:redb\r\n\
             fsync:{}\r\n\
             reads:{}\r\n\
             writes:{}\r\n\
             deletes:{}\r\n\
             commits:{}\r\n\
             discards:{}\r\n\
             alive_snapshots:{}\r\n\
             alive_cursors:{}\r\n",
            crate::VERSION,
            std::env::consts::OS,
            self.started.elapsed().as_secs(),
            stats.keys,
            fsync,
            stats.reads,
            stats.writes,
            stats.deletes,
            stats.commits,
            stats.discards,
            stats.alive_snapshots,
            stats.alive_cursors,
        );
        out
    }
}
