//! Error types for multi-dl
//!
//! Validation failures surface synchronously from the control surface; every
//! other failure is reported asynchronously through the event channel with
//! the failing task's identity and whether a retry was scheduled.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for multi-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for multi-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Task-level error (validation, unknown identity, invalid state)
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// FTP protocol or connection error
    #[error("FTP error: {0}")]
    Ftp(String),

    /// Metadata probe failed
    #[error("discovery failed: {reason}")]
    Discovery {
        /// What went wrong during the probe
        reason: String,
        /// Permanent failures (malformed source, auth rejection) are never retried
        permanent: bool,
    },

    /// I/O failure mid-transfer; the checkpoint is preserved
    #[error("transfer failed: {0}")]
    Transfer(String),

    /// Watchdog fired: no progress within the configured silence window
    #[error("transfer stalled for {}s", idle.as_secs())]
    Stalled {
        /// How long the transfer was silent
        idle: Duration,
    },

    /// Cooperative cancellation observed mid-transfer; not a failure
    #[error("transfer cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,
}

/// Task-level errors rejected before any loader exists
#[derive(Debug, Error)]
pub enum TaskError {
    /// Source descriptor is empty or malformed
    #[error("invalid source: {0}")]
    InvalidSource(String),

    /// No task with the given identity exists
    #[error("task {id} not found")]
    NotFound {
        /// The identity that failed to resolve
        id: i64,
    },

    /// No group with the given identity exists
    #[error("group {id} not found")]
    GroupNotFound {
        /// The identity that failed to resolve
        id: i64,
    },

    /// Pagination parameters must both be positive
    #[error("invalid page parameters: page={page}, page_size={page_size}")]
    InvalidPage {
        /// Requested page (1-based)
        page: u32,
        /// Requested page size
        page_size: u32,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task ID in an invalid state for the operation
        id: i64,
        /// The operation that was attempted
        operation: String,
        /// The state that prevents it
        current_state: String,
    },
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}
