//! Range Scans: KEYS, RKEYS, SCAN and RSCAN
//!
//! All four take `start end [limit]` and cover the same interval,
//! `start < key <= end`, where an empty `start` or `end` leaves that side
//! open. KEYS and SCAN walk it upwards, RKEYS and RSCAN downwards. SCAN and
//! RSCAN interleave each key with its value.
//!
//! ```text
//!   keys:   a   aa   b   c   ca          KEYS a c   -> aa b c
//!               └────────┘                RKEYS a c  -> c b aa
//!            (a,       c]                 KEYS a c 2 -> aa b
//! ```
//!
//! A limit of 0 answers immediately without touching the store. A negative
//! or missing limit means no limit. Every scan reads a single snapshot.

use crate::commands::codec::parse_i64;
use crate::commands::error::{CommandError, CommandResult};
use crate::protocol::Reply;
use crate::storage::{KeyRange, Snapshot, Store};
use bytes::Bytes;

/// Which way a scan walks and what it returns per entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanMode {
    pub reverse: bool,
    pub with_values: bool,
}

impl ScanMode {
    pub const KEYS: Self = Self {
        reverse: false,
        with_values: false,
    };
    pub const RKEYS: Self = Self {
        reverse: true,
        with_values: false,
    };
    pub const SCAN: Self = Self {
        reverse: false,
        with_values: true,
    };
    pub const RSCAN: Self = Self {
        reverse: true,
        with_values: true,
    };
}

/// KEYS start end [limit]
pub fn keys(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    scan_with(store, name, args, ScanMode::KEYS)
}

/// RKEYS start end [limit]
pub fn rkeys(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    scan_with(store, name, args, ScanMode::RKEYS)
}

/// SCAN start end [limit]
pub fn scan(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    scan_with(store, name, args, ScanMode::SCAN)
}

/// RSCAN start end [limit]
pub fn rscan(store: &Store, name: &str, args: &[Bytes]) -> CommandResult {
    scan_with(store, name, args, ScanMode::RSCAN)
}

fn scan_with(store: &Store, name: &str, args: &[Bytes], mode: ScanMode) -> CommandResult {
    let (start, end, limit) = match args {
        [start, end] => (start, end, None),
        [start, end, limit] => {
            let limit = parse_i64(limit).ok_or(CommandError::NotAnInteger)?;
            (start, end, Some(limit))
        }
        _ => return Err(CommandError::wrong_arity(name)),
    };

    // Negative means unlimited.
    let limit = match limit {
        Some(0) => return Ok(Reply::multi(Vec::new())),
        Some(n) if n > 0 => Some(n as usize),
        _ => None,
    };

    let snapshot = store.snapshot()?;
    let entries = collect_range(&snapshot, KeyRange::open_closed(start, end), mode, limit)?;
    Ok(Reply::multi(entries))
}

/// Walks `range` of `snapshot` in the direction `mode` asks for.
fn collect_range(
    snapshot: &Snapshot,
    range: KeyRange,
    mode: ScanMode,
    limit: Option<usize>,
) -> Result<Vec<Reply>, CommandError> {
    let mut cursor = snapshot.iter(range);
    let mut out = Vec::new();

    let mut valid = if mode.reverse {
        cursor.last()
    } else {
        cursor.first()
    };
    let mut taken = 0;

    while valid && limit.map_or(true, |max| taken < max) {
        if let Some(key) = cursor.key() {
            out.push(Reply::Bulk(key.clone()));
        }
        if mode.with_values {
            if let Some(value) = cursor.value() {
                out.push(Reply::Bulk(value.clone()));
            }
        }
        taken += 1;

        valid = if mode.reverse {
            cursor.prev()
        } else {
            cursor.next()
        };
    }

    if let Some(e) = cursor.take_error() {
        return Err(e.into());
    }
    Ok(out)
}
