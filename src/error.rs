//! Typed error taxonomy for the storage and dictionary boundaries.
//!
//! Session-level and config-level failures are deliberately *not* typed
//! errors: per the core's failure-handling design, they never escape to the
//! host. They are downgraded in place (see `session.rs`, `frequency.rs`) and
//! logged via `tracing`.

use thiserror::Error;

/// Failures from the durable K/V store (C1).
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying filesystem failure opening or writing the database file.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The database file exists but failed to open as a valid redb file,
    /// or is already locked by another process.
    #[error("storage file is corrupt: {0}")]
    Corrupt(String),

    /// A read or write transaction could not be started.
    #[error("storage transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// A table could not be opened for reading or writing.
    #[error("storage table error: {0}")]
    Table(#[from] redb::TableError),

    /// A low-level storage operation (insert/remove/iterate) failed.
    #[error("storage operation error: {0}")]
    Storage(#[from] redb::StorageError),

    /// A write transaction failed to commit.
    #[error("storage commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// A unique-key constraint was violated.
    #[error("storage constraint violated: {0}")]
    Constraint(String),

    /// The database is locked by another writer.
    #[error("storage is busy")]
    Busy,
}

impl From<redb::DatabaseError> for StorageError {
    fn from(e: redb::DatabaseError) -> Self {
        match e {
            redb::DatabaseError::DatabaseAlreadyOpen => StorageError::Busy,
            other => StorageError::Corrupt(other.to_string()),
        }
    }
}

/// Failures from the dictionary registry (C2).
#[derive(Error, Debug)]
pub enum DictError {
    /// No dictionary is registered under the given id.
    #[error("dictionary {0:?} is not registered")]
    NotFound(String),

    /// The file extension is not one the loader recognizes.
    #[error("unsupported dictionary file format: {0}")]
    UnsupportedFormat(String),

    /// The dictionary file could not be parsed (I/O failure or malformed body).
    #[error("failed to parse dictionary: {0}")]
    ParseFailed(String),

    /// The file parsed cleanly but contained zero valid entries.
    #[error("dictionary contains no valid entries")]
    EmptyDictionary,

    /// A concurrent `unload` won the race against this `load`.
    #[error("dictionary load was cancelled")]
    Cancelled,

    /// Building the FST index for a loaded dictionary failed.
    #[error("failed to build dictionary index: {0}")]
    IndexBuildFailed(String),
}

impl From<StorageError> for DictError {
    fn from(e: StorageError) -> Self {
        DictError::ParseFailed(e.to_string())
    }
}

/// Failures from the user-frequency JSON backup/restore path (§`FrequencyStore`
/// bulk export/import).
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("user frequency storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("user frequency JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
