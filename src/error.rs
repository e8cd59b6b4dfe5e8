//! Error types for git-s3-backup
//!
//! Two families of errors exist. `BackupError` covers everything that can stop
//! a run, including the pre-flight conditions that abort before any
//! repository is touched. `TransferError` covers a single repository's
//! failure, which is recorded and then skipped past.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for git-s3-backup operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required external program is not available
    #[error("Missing dependency: {0}")]
    Dependency(String),

    /// The repository root directory does not exist
    #[error("Repository root not found: {}", .0.display())]
    RootMissing(PathBuf),

    /// Another live process holds the run lock
    #[error("Another backup is already running (pid {pid})")]
    AlreadyRunning { pid: u32 },

    /// Lock file could not be read or written
    #[error("Lock error: {0}")]
    Lock(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Object store errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// An external command exceeded the per-job timeout
    #[error("Timed out after {0}s")]
    TimedOut(u64),

    /// The run was interrupted by a termination signal
    #[error("Run cancelled")]
    Cancelled,
}

impl BackupError {
    /// Whether this error aborts a run before any job starts
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Dependency(_)
                | Self::RootMissing(_)
                | Self::AlreadyRunning { .. }
                | Self::Lock(_)
        )
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::AlreadyRunning { .. } => 3,
            Self::Cancelled => 130,
            _ => 2,
        }
    }
}

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for git-s3-backup operations
pub type BackupResult<T> = Result<T, BackupError>;

/// Failure of a single repository transfer
#[derive(Error, Debug)]
pub enum TransferError {
    /// The repository directory vanished before it could be archived
    #[error("source path missing: {}", .0.display())]
    SourceMissing(PathBuf),

    /// Creating the compressed snapshot failed
    #[error("archive failed: {0}")]
    Archive(String),

    /// The object store rejected the upload or sync
    #[error("upload failed: {0}")]
    Upload(String),

    /// The transfer exceeded the configured per-job timeout
    #[error("timed out after {0}s")]
    TimedOut(u64),

    /// Another repository earlier in the run already claimed this name
    #[error("name {name} already used by {}", .existing.display())]
    NameCollision { name: String, existing: PathBuf },

    /// The run was cancelled while this transfer was in flight
    #[error("cancelled")]
    Cancelled,
}

impl From<BackupError> for TransferError {
    fn from(err: BackupError) -> Self {
        match err {
            BackupError::Cancelled => Self::Cancelled,
            BackupError::TimedOut(secs) => Self::TimedOut(secs),
            other => Self::Upload(other.to_string()),
        }
    }
}
