//! Path management for git-s3-backup
//!
//! Resolves the well-known locations used when the configuration does not
//! name them explicitly: the config file, the run lock and the run history.
//!
//! ## Path Resolution Order
//!
//! 1. `GIT_S3_BACKUP_HOME` environment variable (if set)
//! 2. Platform project directories (e.g. `~/.config/git-s3-backup` and
//!    `~/.local/share/git-s3-backup` on Linux)

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::BackupError;

/// Manages the default paths used by git-s3-backup
#[derive(Debug, Clone)]
pub struct BackupPaths {
    config_dir: PathBuf,
    state_dir: PathBuf,
}

impl BackupPaths {
    /// Resolve paths from the environment
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn new() -> Result<Self, BackupError> {
        if let Ok(custom) = std::env::var("GIT_S3_BACKUP_HOME") {
            return Ok(Self::with_base_dir(PathBuf::from(custom)));
        }

        let dirs = ProjectDirs::from("", "", "git-s3-backup").ok_or_else(|| {
            BackupError::Config("Could not determine a home directory".into())
        })?;

        Ok(Self {
            config_dir: dirs.config_dir().to_path_buf(),
            state_dir: dirs.data_local_dir().to_path_buf(),
        })
    }

    /// Put everything under one base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            config_dir: base_dir.clone(),
            state_dir: base_dir,
        }
    }

    pub fn config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    pub fn state_dir(&self) -> &PathBuf {
        &self.state_dir
    }

    /// Default config file (`config.json` in the config directory)
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.json")
    }

    /// Default lock record location
    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join("git-s3-backup.lock")
    }

    /// Default run history log
    pub fn history_file(&self) -> PathBuf {
        self.state_dir.join("history.jsonl")
    }
}
