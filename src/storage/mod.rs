//! Storage Engine Module
//!
//! An ordered, transactional byte-string store with point-in-time
//! snapshots and bidirectional range cursors, kept in a redb database file
//! or entirely in memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Store                              │
//! │   get / has / put / delete      begin() ──► Transaction      │
//! │                                 snapshot() ──► Snapshot      │
//! │                                                  │           │
//! │                                         iter(KeyRange)       │
//! │                                                  ▼           │
//! │                                               Cursor         │
//! └───────────────────────────────┬──────────────────────────────┘
//!                                 │ write / read transactions
//!                                 ▼
//!                   ┌───────────────────────────┐
//!                   │  redb (ordkv.redb)        │
//!                   └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use ordkv::storage::{KeyRange, Store};
//! use bytes::Bytes;
//!
//! let store = Store::in_memory().unwrap();
//! store.put("a", "1").unwrap();
//!
//! let mut tx = store.begin().unwrap();
//! tx.put("b", "2").unwrap();
//! tx.commit().unwrap();
//!
//! let snapshot = store.snapshot().unwrap();
//! let mut cursor = snapshot.iter(KeyRange::open_closed(b"a", b""));
//! assert!(cursor.first());
//! assert_eq!(cursor.key().unwrap(), &Bytes::from("b"));
//! ```

pub mod engine;
pub mod error;
pub mod range;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{FsyncPolicy, Snapshot, Store, StoreStats, Transaction, DATABASE_FILE};
pub use error::{StorageError, StorageResult};
pub use range::{successor, Cursor, KeyRange};
