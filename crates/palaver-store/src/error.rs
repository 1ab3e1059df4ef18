use thiserror::Error;

/// Errors produced by the store layer.
///
/// A lookup that finds nothing is not an error; see
/// [`Repository::get_by_id`](crate::Repository::get_by_id).
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// JSON encoding of an array column failed.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The blocking task running the query panicked or was cancelled.
    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A previous holder of the connection panicked mid-operation.
    #[error("Connection lock poisoned")]
    Poisoned,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
