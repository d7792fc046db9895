//! Connection Module
//!
//! Each accepted client runs in its own task, so one slow client never
//! holds up another.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TCP Listener                            │
//! │                    (server.rs)                              │
//! └──────────────────────┬──────────────────────────────────────┘
//!                        │ accept(), spawn task
//!                        ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 ConnectionHandler<S>                        │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │ Read bytes  │───>│   decode    │───>│ execute     │      │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘      │
//! │                                               ▼             │
//! │                                      ┌─────────────┐        │
//! │                                      │ Send replies│        │
//! │                                      └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The handler is generic over the stream, so tests drive it with scripted
//! in-memory streams instead of sockets.

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
