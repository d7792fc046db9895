//! Command Module
//!
//! Turns decoded requests into replies.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Reply decoder   │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandEngine   │  (engine.rs)
//! │  - Lookup       │
//! │  - Fallback     │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Handlers        │  strings.rs, bits.rs, scan.rs, server.rs
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Store           │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! ### Keys and Values
//! - `GET`, `SET`, `GETSET`, `MSET`, `DEL`, `EXISTS`, `RENAME`
//! - `APPEND`, `STRLEN`, `INCR`, `INCRBY`
//!
//! ### Bits
//! - `GETBIT`, `SETBIT`, `BITCOUNT`
//!
//! ### Ranges
//! - `KEYS`, `RKEYS`, `SCAN`, `RSCAN`
//!
//! ### Server
//! - `PING`, `ECHO`, `TIME`, `INFO`, `QUIT`

pub mod bits;
pub mod codec;
pub mod engine;
pub mod error;
pub mod scan;
pub mod server;
pub mod strings;

pub use engine::{Command, CommandEngine, Handler};
pub use error::{CommandError, CommandResult};
