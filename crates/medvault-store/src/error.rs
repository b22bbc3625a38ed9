//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Blob or entry not found. Terminal; retrying will not help.
    #[error("not found: {0}")]
    NotFound(String),

    /// A commit did not extend the ledger head.
    #[error("ledger sequence conflict: expected seq {expected}, got {got}")]
    SeqConflict { expected: u64, got: u64 },

    /// A stored audit row no longer decodes into an entry.
    #[error("audit entry {seq} is corrupt: {reason}")]
    Corrupt { seq: u64, reason: String },

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A lock guarding in-process state was poisoned by a panicking writer.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),

    /// A blocking task was cancelled or panicked.
    #[error("blocking task failed: {0}")]
    Task(String),

    /// The backend refused the write (used by fault-injecting backends).
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
