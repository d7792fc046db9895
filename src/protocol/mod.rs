//! Wire Protocol
//!
//! Requests and replies share one value type, [`Reply`]. The [`decode`]
//! function pulls complete values off a connection buffer and
//! [`Reply::encode`] writes them back out.

pub mod parser;
pub mod types;

pub use parser::{decode, ProtocolError, ProtocolResult, MAX_BULK_SIZE};
pub use types::Reply;
