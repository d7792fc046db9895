//! Key Ranges and Cursors
//!
//! A [`KeyRange`] is the half-open interval `[start, limit)` over the byte
//! ordering of keys. Scan commands speak in terms of `(start, end]`, which
//! [`KeyRange::open_closed`] translates by moving both bounds to their
//! [`successor`]:
//!
//! ```text
//!   keys:     a    aa    b    c    ca
//!   (a, c]:        ^^^^^^^^^^^^
//!   range:   [a\0,            c\0)
//! ```
//!
//! A [`Cursor`] walks a range of a snapshot in either direction.

use crate::storage::engine::{Counters, View};
use crate::storage::error::StorageError;
use bytes::{BufMut, Bytes, BytesMut};
use std::ops::Bound;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// The smallest byte string strictly greater than `key`.
///
/// ```
/// use ordkv::storage::successor;
/// assert_eq!(&successor(b"ab")[..], b"ab\x00");
/// assert_eq!(&successor(b"\xff")[..], b"\xff\x00");
/// ```
pub fn successor(key: &[u8]) -> Bytes {
    let mut next = BytesMut::with_capacity(key.len() + 1);
    next.put_slice(key);
    next.put_u8(0);
    next.freeze()
}

/// A half-open key interval. `None` leaves that side unbounded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    /// Inclusive lower bound.
    pub start: Option<Bytes>,
    /// Exclusive upper bound.
    pub limit: Option<Bytes>,
}

impl KeyRange {
    /// Every key.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(start: Option<Bytes>, limit: Option<Bytes>) -> Self {
        Self { start, limit }
    }

    /// The keys `k` with `start < k <= end`. An empty argument leaves that
    /// side unbounded.
    pub fn open_closed(start: &[u8], end: &[u8]) -> Self {
        let bound = |key: &[u8]| (!key.is_empty()).then(|| successor(key));
        Self {
            start: bound(start),
            limit: bound(end),
        }
    }

    /// True when no key can fall inside the range.
    pub fn is_empty(&self) -> bool {
        match (&self.start, &self.limit) {
            (Some(start), Some(limit)) => start >= limit,
            _ => false,
        }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let above = self.start.as_ref().map_or(true, |s| key >= &s[..]);
        let below = self.limit.as_ref().map_or(true, |l| key < &l[..]);
        above && below
    }

    fn lower(&self) -> Bound<&[u8]> {
        match &self.start {
            Some(start) => Bound::Included(&start[..]),
            None => Bound::Unbounded,
        }
    }

    fn upper(&self) -> Bound<&[u8]> {
        match &self.limit {
            Some(limit) => Bound::Excluded(&limit[..]),
            None => Bound::Unbounded,
        }
    }
}

/// True when no key can lie between `lower` and `upper`.
fn bounds_empty(lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l) | Bound::Excluded(l), Bound::Included(u) | Bound::Excluded(u)) => {
            l >= u
        }
        _ => false,
    }
}

/// A bidirectional iterator over one range of a snapshot.
///
/// The cursor shares the snapshot's read transaction, so writes committed
/// after it was created are never observed. Movement returns `false` once
/// the cursor leaves the range, after which `key()` and `value()` are `None`.
/// Moving an unpositioned cursor with `next` or `prev` behaves like `first`
/// or `last`.
///
/// A storage failure also ends iteration. It is kept in [`Cursor::error`]
/// and every later move returns `false`.
pub struct Cursor {
    view: Arc<View>,
    range: KeyRange,
    current: Option<(Bytes, Bytes)>,
    error: Option<StorageError>,
    counters: Arc<Counters>,
}

impl Cursor {
    pub(crate) fn new(view: Arc<View>, range: KeyRange, counters: Arc<Counters>) -> Self {
        counters.alive_cursors.fetch_add(1, Ordering::Relaxed);
        Self {
            view,
            range,
            current: None,
            error: None,
            counters,
        }
    }

    fn seek(&mut self, lower: Bound<&[u8]>, upper: Bound<&[u8]>, backward: bool) -> bool {
        self.current = None;
        if self.error.is_some() || bounds_empty(lower, upper) {
            return false;
        }

        match self.view.edge(lower, upper, backward) {
            Ok(entry) => self.current = entry,
            Err(e) => self.error = Some(e),
        }
        self.current.is_some()
    }

    /// Moves to the smallest key in range.
    pub fn first(&mut self) -> bool {
        let range = self.range.clone();
        self.seek(range.lower(), range.upper(), false)
    }

    /// Moves to the largest key in range.
    pub fn last(&mut self) -> bool {
        let range = self.range.clone();
        self.seek(range.lower(), range.upper(), true)
    }

    /// Moves to the next larger key in range.
    pub fn next(&mut self) -> bool {
        let key = match &self.current {
            Some((key, _)) => key.clone(),
            None => return self.first(),
        };
        let range = self.range.clone();
        self.seek(Bound::Excluded(&key[..]), range.upper(), false)
    }

    /// Moves to the next smaller key in range.
    pub fn prev(&mut self) -> bool {
        let key = match &self.current {
            Some((key, _)) => key.clone(),
            None => return self.last(),
        };
        let range = self.range.clone();
        self.seek(range.lower(), Bound::Excluded(&key[..]), true)
    }

    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    pub fn key(&self) -> Option<&Bytes> {
        self.current.as_ref().map(|(k, _)| k)
    }

    pub fn value(&self) -> Option<&Bytes> {
        self.current.as_ref().map(|(_, v)| v)
    }

    pub fn range(&self) -> &KeyRange {
        &self.range
    }

    /// The failure that stopped iteration, if any.
    pub fn error(&self) -> Option<&StorageError> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<StorageError> {
        self.error.take()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.counters.alive_cursors.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("range", &self.range)
            .field("key", &self.key())
            .field("error", &self.error)
            .finish()
    }
}
