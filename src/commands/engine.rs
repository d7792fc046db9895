//! Command Registry and Dispatch
//!
//! ```text
//!   Reply::Multi([name, arg1, ...])
//!            │ execute()
//!            ▼
//!   ┌────────────────────┐  lowercase(name)  ┌──────────────────┐
//!   │   CommandEngine    │──────────────────>│ HashMap<name, .> │──> handler(name, args)
//!   └────────────────────┘                   └──────────────────┘
//!            │ no match
//!            ▼
//!      fallback(name, args)  or  UnknownCommand
//! ```
//!
//! The registry is filled once at startup and only read afterwards, so a
//! single `Arc<CommandEngine>` is shared by every connection.

use crate::commands::error::{CommandError, CommandResult};
use crate::commands::{bits, scan, server, strings};
use crate::protocol::Reply;
use crate::storage::Store;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// A command implementation. Receives the command name and its arguments.
pub type Handler = Box<dyn Fn(&str, &[Bytes]) -> CommandResult + Send + Sync>;

/// A storage-backed command implementation.
pub type StoreHandler = fn(&Store, &str, &[Bytes]) -> CommandResult;

/// A named handler.
pub struct Command {
    name: String,
    handler: Handler,
}

impl Command {
    pub fn new<F>(name: &str, handler: F) -> Self
    where
        F: Fn(&str, &[Bytes]) -> CommandResult + Send + Sync + 'static,
    {
        Self {
            name: name.to_ascii_lowercase(),
            handler: Box::new(handler),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, name: &str, args: &[Bytes]) -> CommandResult {
        (self.handler)(name, args)
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command").field("name", &self.name).finish()
    }
}

/// Maps command names to handlers.
#[derive(Debug, Default)]
pub struct CommandEngine {
    commands: HashMap<String, Command>,
    fallback: Option<Command>,
}

impl CommandEngine {
    /// Creates an empty engine. Unknown names fail with `UnknownCommand`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty engine that routes unknown names to `fallback`.
    pub fn with_fallback(fallback: Command) -> Self {
        Self {
            commands: HashMap::new(),
            fallback: Some(fallback),
        }
    }

    /// The full command set served by `ordkv`, backed by `store`.
    pub fn standard(store: Arc<Store>) -> Self {
        let mut engine = Self::new();
        engine.register_standard(store);
        engine
    }

    /// Registers the full command set on an existing engine.
    pub fn register_standard(&mut self, store: Arc<Store>) {
        // Strings
        self.register_store(&store, "get", strings::get);
        self.register_store(&store, "set", strings::set);
        self.register_store(&store, "getset", strings::getset);
        self.register_store(&store, "mset", strings::mset);
        self.register_store(&store, "del", strings::del);
        self.register_store(&store, "exists", strings::exists);
        self.register_store(&store, "rename", strings::rename);
        self.register_store(&store, "append", strings::append);
        self.register_store(&store, "strlen", strings::strlen);
        self.register_store(&store, "incr", strings::incr);
        self.register_store(&store, "incrby", strings::incrby);

        // Bits
        self.register_store(&store, "getbit", bits::getbit);
        self.register_store(&store, "setbit", bits::setbit);
        self.register_store(&store, "bitcount", bits::bitcount);

        // Ranges
        self.register_store(&store, "keys", scan::keys);
        self.register_store(&store, "rkeys", scan::rkeys);
        self.register_store(&store, "scan", scan::scan);
        self.register_store(&store, "rscan", scan::rscan);

        // Server
        self.register("ping", server::ping);
        self.register("echo", server::echo);
        self.register("time", server::time);
        self.register("quit", server::quit);
        let info = server::Info::new(Arc::clone(&store));
        self.register("info", move |name, args| info.call(name, args));
    }

    /// Adds or replaces the handler for `name`. Names are case-insensitive.
    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&str, &[Bytes]) -> CommandResult + Send + Sync + 'static,
    {
        let command = Command::new(name, handler);
        self.commands.insert(command.name.clone(), command);
    }

    /// Registers a handler that runs against `store`.
    pub fn register_store(&mut self, store: &Arc<Store>, name: &str, handler: StoreHandler) {
        let store = Arc::clone(store);
        self.register(name, move |name, args| handler(&store, name, args));
    }

    /// Runs the handler registered for `name`, or the fallback.
    pub fn dispatch(&self, name: &str, args: &[Bytes]) -> CommandResult {
        let key = name.to_ascii_lowercase();
        match self.commands.get(&key) {
            Some(command) => command.call(command.name(), args),
            None => match &self.fallback {
                Some(fallback) => fallback.call(name, args),
                None => Err(CommandError::UnknownCommand(name.to_string())),
            },
        }
    }

    /// Decodes a request, dispatches it and turns any failure into an
    /// Error reply. Never fails.
    pub fn execute(&self, request: Reply) -> Reply {
        let args = match request_args(request) {
            Ok(args) => args,
            Err(e) => return e.into(),
        };

        let name = match std::str::from_utf8(&args[0]) {
            Ok(name) => name,
            Err(_) => return CommandError::InvalidRequest.into(),
        };

        trace!(command = %name, args = args.len() - 1, "Dispatching command");

        match self.dispatch(name, &args[1..]) {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_backend() {
                    warn!(command = %name, error = %e, "Storage failure");
                }
                e.into()
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(&name.to_ascii_lowercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.commands.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Splits a request into its bulk parts. The result is never empty.
fn request_args(request: Reply) -> Result<Vec<Bytes>, CommandError> {
    let parts = match request {
        Reply::Multi(parts) if !parts.is_empty() => parts,
        _ => return Err(CommandError::InvalidRequest),
    };

    parts
        .into_iter()
        .map(|part| match part {
            Reply::Bulk(data) => Ok(data),
            _ => Err(CommandError::InvalidRequest),
        })
        .collect()
}
