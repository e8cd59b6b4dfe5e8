//! Per-repository transfer
//!
//! In archive mode a repository is packed with `tar -czf` into a private
//! scratch directory and uploaded as `{prefix}/{repo}/{repo}_{YYYYMMDD_HHMMSS}.tar.gz`.
//! The scratch directory is a `TempDir`, so it is removed whether the upload
//! succeeds or not. In mirror mode the repository directory is synced to
//! `{prefix}/{repo}/latest/` with deletion of destination-only objects.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Local};
use tokio::process::Command;
use tracing::{debug, info, instrument};

use super::scanner::RepositoryRef;
use crate::config::{BackupConfig, TransferMode};
use crate::error::{BackupError, BackupResult, TransferError};
use crate::exec::{self, CommandRunner};
use crate::storage::StorageClient;

/// File extension of archive-mode artifacts
pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

/// One repository to transfer in one run
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub repository: RepositoryRef,
    /// Start time of the run this job belongs to
    pub timestamp: DateTime<Local>,
}

impl BackupJob {
    pub fn new(repository: RepositoryRef, timestamp: DateTime<Local>) -> Self {
        Self {
            repository,
            timestamp,
        }
    }

    /// `{name}_{YYYYMMDD_HHMMSS}.tar.gz`
    pub fn artifact_name(&self) -> String {
        format!(
            "{}_{}{}",
            self.repository.name,
            self.timestamp.format("%Y%m%d_%H%M%S"),
            ARCHIVE_EXTENSION
        )
    }
}

/// What a successful transfer left in the object store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// A single uploaded archive
    Archive { key: String, size_bytes: u64 },
    /// A mirrored directory tree
    Mirror { key_prefix: String },
}

impl Artifact {
    pub fn key(&self) -> &str {
        match self {
            Self::Archive { key, .. } => key,
            Self::Mirror { key_prefix } => key_prefix,
        }
    }
}

/// Produces and uploads one artifact per job
pub struct ArchiveBuilder<'a> {
    config: &'a BackupConfig,
    storage: &'a dyn StorageClient,
    runner: CommandRunner,
}

impl<'a> ArchiveBuilder<'a> {
    pub fn new(config: &'a BackupConfig, storage: &'a dyn StorageClient, runner: CommandRunner) -> Self {
        Self {
            config,
            storage,
            runner,
        }
    }

    /// Check what the configured mode needs: `tar` and a scratch directory
    pub fn preflight(&self) -> BackupResult<()> {
        if self.config.mode != TransferMode::Archive {
            return Ok(());
        }

        exec::probe("tar")?;

        if !self.config.scratch_dir.is_dir() {
            return Err(BackupError::Config(format!(
                "scratch directory does not exist: {}",
                self.config.scratch_dir.display()
            )));
        }
        Ok(())
    }

    /// Transfer one repository
    ///
    /// Errors are returned to the caller, never raised further; nothing is
    /// left in the scratch directory either way.
    #[instrument(skip(self, job), fields(repository = %job.repository.name))]
    pub fn transfer(&self, job: &BackupJob) -> Result<Artifact, TransferError> {
        // Archive and mirror the repository contents, never a symlink to them
        let source = match fs::canonicalize(&job.repository.path) {
            Ok(path) if path.is_dir() => path,
            _ => return Err(TransferError::SourceMissing(job.repository.path.clone())),
        };

        let artifact = match self.config.mode {
            TransferMode::Archive => self.archive(job, &source)?,
            TransferMode::Mirror => self.mirror(job, &source)?,
        };

        info!(destination = %self.storage.uri(artifact.key()), "transferred");
        Ok(artifact)
    }

    fn archive(&self, job: &BackupJob, source: &Path) -> Result<Artifact, TransferError> {
        let scratch = tempfile::Builder::new()
            .prefix("git-s3-backup-")
            .tempdir_in(&self.config.scratch_dir)
            .map_err(|e| TransferError::Archive(format!("Failed to create scratch directory: {}", e)))?;

        let name = job.artifact_name();
        let archive_path = scratch.path().join(&name);

        self.create_tarball(source, &archive_path)?;

        let size_bytes = fs::metadata(&archive_path).map(|m| m.len()).unwrap_or(0);
        debug!(archive = %archive_path.display(), size_bytes, "archive created");

        let key = self.config.artifact_key(&job.repository.name, &name);
        self.storage.put_file(&archive_path, &key)?;

        Ok(Artifact::Archive { key, size_bytes })
    }

    fn create_tarball(&self, source: &Path, dest: &Path) -> Result<(), TransferError> {
        let (Some(parent), Some(dir_name)) = (source.parent(), source.file_name()) else {
            return Err(TransferError::Archive(format!(
                "cannot archive {}",
                source.display()
            )));
        };

        let mut cmd = Command::new("tar");
        cmd.arg("-czf").arg(dest).arg("-C").arg(parent).arg(dir_name);
        self.runner.run(&mut cmd)?;
        Ok(())
    }

    fn mirror(&self, job: &BackupJob, source: &Path) -> Result<Artifact, TransferError> {
        let key_prefix = self.config.mirror_key(&job.repository.name);
        self.storage.sync_dir(source, &key_prefix)?;
        Ok(Artifact::Mirror { key_prefix })
    }
}
