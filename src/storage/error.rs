use std::io;
use thiserror::Error;

/// Failures reported by the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("database error: {0}")]
    Backend(#[from] redb::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

// redb reports a distinct error type per operation; all of them fold into
// `redb::Error`.
macro_rules! backend_error {
    ($($source:ty),+ $(,)?) => {
        $(
            impl From<$source> for StorageError {
                fn from(source: $source) -> Self {
                    Self::Backend(source.into())
                }
            }
        )+
    };
}

backend_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
