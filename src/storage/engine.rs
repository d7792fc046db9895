//! Ordered Transactional Storage Engine
//!
//! The key space is one redb table of byte-string keys and values. redb
//! keeps the table as a copy-on-write B-tree, commits through a checksummed
//! two-slot header, and gives every read transaction a stable view of the
//! last commit, which is what [`Snapshot`] and [`Cursor`] hand out.
//!
//! ## Concurrency Model
//!
//! ```text
//!            point put/delete          begin() ... commit()
//!                   │                          │
//!                   ▼                          ▼
//!        ┌──────────────────────────────────────────────┐
//!        │ Database::begin_write()                      │  one writer at a time
//!        └──────────────────────┬───────────────────────┘
//!                               │ commit (Immediate or Eventual)
//!                               ▼
//!        ┌──────────────────────────────────────────────┐
//!        │ table "data": &[u8] -> &[u8]                 │
//!        └──────────────────────┬───────────────────────┘
//!                               │ Database::begin_read()
//!                               ▼
//!                     Snapshot ──► Cursor
//! ```
//!
//! A [`Transaction`] owns the database's single write transaction for its
//! whole lifetime. Reads inside it see its own pending writes over a key
//! space nobody else can change, and nothing it writes is visible to
//! readers until commit.

use crate::storage::error::StorageResult;
use crate::storage::range::{Cursor, KeyRange};
use bytes::Bytes;
use redb::backends::InMemoryBackend;
use redb::{
    Database, Durability, ReadOnlyTable, ReadTransaction, ReadableTable, ReadableTableMetadata,
    StorageBackend, TableDefinition, WriteTransaction,
};
use std::ops::Bound;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// The single table holding every key.
const DATA: TableDefinition<&[u8], &[u8]> = TableDefinition::new("data");

/// File name of the database inside the data directory.
pub const DATABASE_FILE: &str = "ordkv.redb";

pub(crate) type DataTable = ReadOnlyTable<&'static [u8], &'static [u8]>;

/// When a commit must reach stable storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum FsyncPolicy {
    /// Sync on every commit. A success reply means the write is on disk.
    #[default]
    Always,
    /// Commits become durable with a later synced commit or a clean close.
    Eventual,
}

impl FsyncPolicy {
    fn durability(self) -> Durability {
        match self {
            FsyncPolicy::Always => Durability::Immediate,
            FsyncPolicy::Eventual => Durability::Eventual,
        }
    }
}

/// Operation counters shared with snapshots and cursors.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    keys: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    commits: AtomicU64,
    discards: AtomicU64,
    pub(crate) alive_snapshots: AtomicU64,
    pub(crate) alive_cursors: AtomicU64,
}

impl Counters {
    fn adjust_keys(&self, delta: i64) {
        if delta >= 0 {
            self.keys.fetch_add(delta as u64, Ordering::Relaxed);
        } else {
            self.keys.fetch_sub(delta.unsigned_abs(), Ordering::Relaxed);
        }
    }
}

/// The ordered key-value store.
///
/// Designed to be wrapped in an `Arc` and shared by every connection.
pub struct Store {
    db: Database,
    policy: FsyncPolicy,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("policy", &self.policy)
            .field("keys", &self.counters.keys.load(Ordering::Relaxed))
            .finish()
    }
}

impl Store {
    /// Creates a store held entirely in memory. Contents are lost when it
    /// is dropped.
    pub fn in_memory() -> StorageResult<Self> {
        Self::with_backend(InMemoryBackend::new(), FsyncPolicy::Always)
    }

    /// Creates a store on top of any redb storage backend.
    pub fn with_backend(backend: impl StorageBackend, policy: FsyncPolicy) -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(backend)?;
        Self::init(db, policy)
    }

    /// Opens the store kept in `dir`, creating the directory and database
    /// file if needed.
    pub fn open(dir: impl AsRef<Path>, policy: FsyncPolicy) -> StorageResult<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(DATABASE_FILE);

        let store = Self::init(Database::create(&path)?, policy)?;
        info!(
            path = %path.display(),
            keys = store.len(),
            policy = ?policy,
            "Database opened"
        );
        Ok(store)
    }

    fn init(db: Database, policy: FsyncPolicy) -> StorageResult<Self> {
        // Create the table up front so read transactions always find it
        let txn = db.begin_write()?;
        txn.open_table(DATA)?;
        txn.commit()?;

        let read = db.begin_read()?;
        let keys = read.open_table(DATA)?.len()?;
        drop(read);

        let counters = Counters::default();
        counters.keys.store(keys, Ordering::Relaxed);
        Ok(Self {
            db,
            policy,
            counters: Arc::new(counters),
        })
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DATA)?;
        let value = table.get(key)?.map(|v| Bytes::copy_from_slice(v.value()));
        Ok(value)
    }

    pub fn has(&self, key: &[u8]) -> StorageResult<bool> {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DATA)?;
        let found = table.get(key)?.is_some();
        Ok(found)
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn put(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StorageResult<()> {
        let mut tx = self.begin()?;
        tx.put(key, value)?;
        tx.commit()
    }

    /// Removes `key`. Removing an absent key is not an error.
    pub fn delete(&self, key: impl AsRef<[u8]>) -> StorageResult<()> {
        let mut tx = self.begin()?;
        tx.delete(key)?;
        tx.commit()
    }

    /// Starts a transaction. Blocks while another writer is active.
    pub fn begin(&self) -> StorageResult<Transaction<'_>> {
        let mut txn = self.db.begin_write()?;
        txn.set_durability(self.policy.durability());
        Ok(Transaction {
            txn,
            key_delta: 0,
            writes: 0,
            deletes: 0,
            outcome: Outcome {
                counters: &self.counters,
                committed: false,
            },
        })
    }

    /// Captures the last committed state of the key space.
    pub fn snapshot(&self) -> StorageResult<Snapshot> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DATA)?;
        self.counters.alive_snapshots.fetch_add(1, Ordering::Relaxed);
        Ok(Snapshot {
            view: Arc::new(View { table, _txn: txn }),
            counters: Arc::clone(&self.counters),
        })
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> u64 {
        self.counters.keys.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn policy(&self) -> FsyncPolicy {
        self.policy
    }

    /// Returns a copy of the engine counters.
    pub fn stats(&self) -> StoreStats {
        let c = &self.counters;
        StoreStats {
            keys: c.keys.load(Ordering::Relaxed),
            reads: c.reads.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            commits: c.commits.load(Ordering::Relaxed),
            discards: c.discards.load(Ordering::Relaxed),
            alive_snapshots: c.alive_snapshots.load(Ordering::Relaxed),
            alive_cursors: c.alive_cursors.load(Ordering::Relaxed),
        }
    }
}

/// Engine counters as reported by INFO.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of keys currently stored
    pub keys: u64,
    /// Point reads outside transactions
    pub reads: u64,
    /// Keys written by committed transactions
    pub writes: u64,
    /// Deletes issued by committed transactions
    pub deletes: u64,
    /// Transactions committed
    pub commits: u64,
    /// Transactions rolled back
    pub discards: u64,
    pub alive_snapshots: u64,
    pub alive_cursors: u64,
}

// ============================================================================
// Transactions
// ============================================================================

/// Counts a discard unless the transaction reached a successful commit.
struct Outcome<'a> {
    counters: &'a Counters,
    committed: bool,
}

impl Drop for Outcome<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.counters.discards.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// An all-or-nothing group of reads and writes.
///
/// Holds the store's write transaction until it is committed, discarded or
/// dropped. Dropping without committing aborts every pending write.
pub struct Transaction<'a> {
    txn: WriteTransaction,
    key_delta: i64,
    writes: u64,
    deletes: u64,
    outcome: Outcome<'a>,
}

impl<'a> Transaction<'a> {
    /// Reads `key`, seeing this transaction's own pending writes.
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let table = self.txn.open_table(DATA)?;
        let value = table.get(key)?.map(|v| Bytes::copy_from_slice(v.value()));
        Ok(value)
    }

    pub fn has(&self, key: &[u8]) -> StorageResult<bool> {
        let table = self.txn.open_table(DATA)?;
        let found = table.get(key)?.is_some();
        Ok(found)
    }

    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> StorageResult<()> {
        let mut table = self.txn.open_table(DATA)?;
        let replaced = table.insert(key.as_ref(), value.as_ref())?.is_some();
        if !replaced {
            self.key_delta += 1;
        }
        self.writes += 1;
        Ok(())
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) -> StorageResult<()> {
        let mut table = self.txn.open_table(DATA)?;
        let removed = table.remove(key.as_ref())?.is_some();
        if removed {
            self.key_delta -= 1;
        }
        self.deletes += 1;
        Ok(())
    }

    /// Makes every pending write visible in one step.
    ///
    /// On error nothing becomes visible and the transaction counts as
    /// discarded.
    pub fn commit(self) -> StorageResult<()> {
        let Transaction {
            txn,
            key_delta,
            writes,
            deletes,
            mut outcome,
        } = self;

        txn.commit()?;
        outcome.committed = true;

        let counters = outcome.counters;
        counters.adjust_keys(key_delta);
        counters.writes.fetch_add(writes, Ordering::Relaxed);
        counters.deletes.fetch_add(deletes, Ordering::Relaxed);
        counters.commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Drops every pending write.
    pub fn discard(self) -> StorageResult<()> {
        self.txn.abort()?;
        Ok(())
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// A read transaction together with the open data table.
pub(crate) struct View {
    table: DataTable,
    _txn: ReadTransaction,
}

impl View {
    fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let value = self
            .table
            .get(key)?
            .map(|v| Bytes::copy_from_slice(v.value()));
        Ok(value)
    }

    /// The first (or, with `backward`, last) entry between the bounds.
    pub(crate) fn edge(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        backward: bool,
    ) -> StorageResult<Option<(Bytes, Bytes)>> {
        let mut entries = self.table.range::<&[u8]>((lower, upper))?;
        let entry = if backward {
            entries.next_back()
        } else {
            entries.next()
        };

        match entry {
            Some(Ok((key, value))) => Ok(Some((
                Bytes::copy_from_slice(key.value()),
                Bytes::copy_from_slice(value.value()),
            ))),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}

/// A read-only, point-in-time view of the key space.
pub struct Snapshot {
    view: Arc<View>,
    counters: Arc<Counters>,
}

impl Snapshot {
    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.view.get(key)
    }

    pub fn has(&self, key: &[u8]) -> StorageResult<bool> {
        Ok(self.view.get(key)?.is_some())
    }

    /// Number of keys in the snapshot.
    pub fn len(&self) -> StorageResult<u64> {
        Ok(self.view.table.len()?)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.view.table.is_empty()?)
    }

    /// Opens a cursor over `range`.
    pub fn iter(&self, range: KeyRange) -> Cursor {
        Cursor::new(Arc::clone(&self.view), range, Arc::clone(&self.counters))
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.counters.alive_snapshots.fetch_sub(1, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::FlakyBackend;
    use crate::storage::StorageError;
    use std::thread;
    use tempfile::tempdir;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn test_put_get_delete() {
        let store = Store::in_memory().unwrap();
        assert_eq!(store.get(b"name").unwrap(), None);

        store.put("name", "ordkv").unwrap();
        assert_eq!(store.get(b"name").unwrap(), Some(b("ordkv")));
        assert!(store.has(b"name").unwrap());
        assert_eq!(store.len(), 1);

        store.put("name", "again").unwrap();
        assert_eq!(store.len(), 1);

        store.delete("name").unwrap();
        store.delete("never-there").unwrap();
        assert!(!store.has(b"name").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn test_transaction_sees_own_writes() {
        let store = Store::in_memory().unwrap();
        store.put("a", "1").unwrap();

        let mut tx = store.begin().unwrap();
        tx.put("b", "2").unwrap();
        tx.delete("a").unwrap();
        assert_eq!(tx.get(b"b").unwrap(), Some(b("2")));
        assert!(!tx.has(b"a").unwrap());
        tx.commit().unwrap();

        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"b").unwrap(), Some(b("2")));
        assert_eq!(store.len(), 1);
        // Includes the commit behind the first put
        assert_eq!(store.stats().commits, 2);
    }

    #[test]
    fn test_discard_and_drop_roll_back() {
        let store = Store::in_memory().unwrap();

        let mut tx = store.begin().unwrap();
        tx.put("a", "1").unwrap();
        tx.discard().unwrap();

        {
            let mut tx = store.begin().unwrap();
            tx.put("b", "2").unwrap();
        }

        assert!(store.is_empty());
        assert_eq!(store.get(b"b").unwrap(), None);
        assert_eq!(store.stats().discards, 2);
        assert_eq!(store.stats().commits, 0);
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let store = Store::in_memory().unwrap();
        store.put("a", "1").unwrap();

        let snapshot = store.snapshot().unwrap();
        store.put("a", "2").unwrap();
        store.put("b", "3").unwrap();

        assert_eq!(snapshot.get(b"a").unwrap(), Some(b("1")));
        assert!(!snapshot.has(b"b").unwrap());
        assert_eq!(snapshot.len().unwrap(), 1);
        assert_eq!(store.stats().alive_snapshots, 1);

        drop(snapshot);
        assert_eq!(store.stats().alive_snapshots, 0);
        assert_eq!(store.get(b"a").unwrap(), Some(b("2")));
    }

    #[test]
    fn test_failed_commit_publishes_nothing() {
        let (backend, fail) = FlakyBackend::new();
        let store = Store::with_backend(backend, FsyncPolicy::Always).unwrap();
        store.put("k1", "old").unwrap();

        let mut tx = store.begin().unwrap();
        tx.put("k1", "new").unwrap();
        tx.put("k2", "new").unwrap();
        fail.store(true, Ordering::SeqCst);
        assert!(matches!(tx.commit(), Err(StorageError::Backend(_))));
        assert!(store.put("k3", "v").is_err());

        // Reads may keep failing after an I/O error, but never show the batch
        assert!(!matches!(store.get(b"k1"), Ok(Some(v)) if v == b("new")));
        assert!(!matches!(store.get(b"k2"), Ok(Some(_))));
        assert!(!matches!(store.get(b"k3"), Ok(Some(_))));
        assert!(store.stats().discards >= 1);
        assert_eq!(store.stats().commits, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reopen_keeps_committed_data() {
        let dir = tempdir().unwrap();

        {
            let store = Store::open(dir.path(), FsyncPolicy::Always).unwrap();
            store.put("a", "1").unwrap();
            store.put("b", "2").unwrap();
            let mut tx = store.begin().unwrap();
            tx.delete("a").unwrap();
            tx.put("c", "3").unwrap();
            tx.commit().unwrap();

            // Never committed, so never on disk
            let mut tx = store.begin().unwrap();
            tx.put("d", "4").unwrap();
        }

        assert!(dir.path().join(DATABASE_FILE).exists());
        let store = Store::open(dir.path(), FsyncPolicy::Always).unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"b").unwrap(), Some(b("2")));
        assert_eq!(store.get(b"c").unwrap(), Some(b("3")));
        assert_eq!(store.get(b"d").unwrap(), None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_large_values_round_trip() {
        let store = Store::in_memory().unwrap();
        let value = Bytes::from(vec![0xabu8; 4 * 1024 * 1024]);
        store.put("big", &value).unwrap();
        assert_eq!(store.get(b"big").unwrap(), Some(value));
    }

    #[test]
    fn test_transactions_serialise_counters() {
        let store = Arc::new(Store::in_memory().unwrap());
        let mut handles = Vec::new();

        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let mut tx = store.begin().unwrap();
                    let n: u64 = tx
                        .get(b"counter")
                        .unwrap()
                        .map(|v| std::str::from_utf8(&v).unwrap().parse().unwrap())
                        .unwrap_or(0);
                    tx.put("counter", (n + 1).to_string()).unwrap();
                    tx.commit().unwrap();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get(b"counter").unwrap(), Some(b("800")));
        assert_eq!(store.len(), 1);
    }
}
