//! Error types for vidqueue
//!
//! Two layers of errors live here:
//! - [`Error`] is returned by the library's operations (ledger, record store, config)
//! - [`EngineError`] is returned by [`Engine::invoke`](crate::engine::Engine::invoke) and is
//!   converted into a Failed task outcome at the session boundary, never surfaced to callers
//!
//! Terminal failures of a download are not `Error`s; they are reported as
//! [`Outcome::Failed`](crate::types::Outcome) with a [`FailureKind`](crate::types::FailureKind).

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{TaskId, TaskState};

/// Result type alias for vidqueue operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vidqueue
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "network.concurrent_downloads")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Download-related error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// The URL is not a supported Bilibili / YouTube / YouTube Music link
    #[error("unsupported URL: {0}")]
    UnsupportedUrl(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new work
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
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

    /// Constraint violation (e.g., empty URL)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Task-related errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Task not found in the ledger
    #[error("task {id} not found")]
    NotFound {
        /// The task ID that was not found
        id: TaskId,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task ID that is in an invalid state for the operation
        id: TaskId,
        /// The operation that was attempted (e.g., "start", "retry")
        operation: String,
        /// The current state that prevents the operation
        current_state: TaskState,
    },

    /// Task already has a live session
    #[error("task {id} already has a running session")]
    AlreadyActive {
        /// The task ID
        id: TaskId,
    },

    /// Output directory does not exist and cannot be created
    #[error("cannot create output directory {}: {reason}", path.display())]
    OutputDirectory {
        /// Directory that was requested
        path: PathBuf,
        /// Underlying I/O error text
        reason: String,
    },
}

/// Errors raised by an engine before it produces a callback stream
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine binary could not be found or executed
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// The engine refused the request (bad URL, unsupported site, bad options)
    #[error("engine rejected request: {0}")]
    Rejected(String),

    /// I/O error while spawning the engine
    #[error("failed to start engine: {0}")]
    Spawn(#[from] std::io::Error),
}
