//! Error types for sync runs.
//!
//! Errors fall into two groups: those that abort the whole run
//! (configuration and listing failures) and those that only fail
//! a single job (transfer failures, path conflicts, unsafe keys, faults).

use std::path::PathBuf;

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid arguments, credentials, region or bucket target.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network or I/O failure while moving or deleting a single item.
    #[error("transfer error on '{path}': {message}")]
    Transfer {
        /// Key or local path the job was working on.
        path: String,
        /// Error message.
        message: String,
    },

    /// A path component expected to be a directory is a regular file.
    #[error("path conflict: {} is a file, expected a directory", path.display())]
    PathConflict {
        /// The offending path component.
        path: PathBuf,
    },

    /// A remote key that cannot be mapped under the local root.
    #[error("unsafe key '{key}': contains '.' or '..' components")]
    UnsafeKey {
        /// The rejected key.
        key: String,
    },

    /// The source or destination namespace could not be enumerated.
    #[error("listing error: {0}")]
    Listing(String),

    /// A job panicked while executing.
    #[error("job fault: {0}")]
    Fault(String),
}

impl SyncError {
    /// Build a transfer error from any displayable cause.
    pub fn transfer(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        SyncError::Transfer {
            path: path.into(),
            message: format!("{:#}", err),
        }
    }

    /// Whether running the job again could change the outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Transfer { .. })
    }

    /// Whether this error aborts the whole run rather than a single job.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Configuration(_) | SyncError::Listing(_))
    }

    /// Process exit code for a run that ended with this error.
    pub fn exit_code(&self) -> u8 {
        if self.is_fatal() {
            2
        } else {
            1
        }
    }
}
