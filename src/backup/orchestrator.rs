//! Run orchestration
//!
//! Sequences one run: pre-flight checks, lock, scan, one transfer per
//! repository, retention sweep, history. Repositories are processed strictly
//! one after another. A failing repository is recorded and skipped past, as
//! is a repository whose name was already claimed earlier in the run (`alpha`
//! and `alpha.git` would share one destination). Only pre-flight problems (configuration, missing tools, missing root, a
//! held lock) abort the run, and they do so before any job starts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

use super::archive::{ArchiveBuilder, BackupJob};
use super::history::RunHistory;
use super::lock::LockManager;
use super::retention::RetentionSweeper;
use super::scanner::{RepositoryRef, RepositoryScanner};
use crate::config::{BackupConfig, TransferMode};
use crate::error::{BackupError, BackupResult, TransferError};
use crate::exec::CommandRunner;
use crate::storage::{open_storage, StorageClient};

/// What a run should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Lock, transfer every repository, sweep
    Execute,
    /// Validate configuration and dependencies only
    DryRun,
    /// Enumerate candidate repositories only
    List,
}

/// A repository that failed during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub repository: String,
    pub reason: String,
}

/// Outcome of an `execute` run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mode: TransferMode,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<JobFailure>,
    /// Locations written by successful jobs
    pub artifacts: Vec<String>,
    /// Expired artifacts deleted by the retention sweep
    pub swept: usize,
    #[serde(default)]
    pub sweep_failures: Vec<String>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub cancelled: bool,
}

impl RunResult {
    pub fn new(mode: TransferMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            mode,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
            artifacts: Vec::new(),
            swept: 0,
            sweep_failures: Vec::new(),
            elapsed_ms: 0,
            cancelled: false,
        }
    }

    fn record_success(&mut self, location: String) {
        self.succeeded += 1;
        self.artifacts.push(location);
    }

    fn record_failure(&mut self, repository: &str, err: &TransferError) {
        self.failed += 1;
        self.failures.push(JobFailure {
            repository: repository.to_string(),
            reason: err.to_string(),
        });
    }

    /// Every repository transferred and the sweep had no failures
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.sweep_failures.is_empty() && !self.cancelled
    }

    /// 0 on full success, 1 when some items failed, 130 when cancelled
    pub fn exit_code(&self) -> u8 {
        if self.cancelled {
            130
        } else if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Result of a `dry-run`
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    pub repo_root: String,
    pub destination: String,
    pub mode: TransferMode,
    pub retention_days: i64,
    pub repositories: usize,
    pub lock_path: String,
}

/// Output of `Orchestrator::run`
#[derive(Debug)]
pub enum RunReport {
    Listed(Vec<RepositoryRef>),
    Validated(DryRunReport),
    Executed(RunResult),
}

/// Owns the configuration and storage client for one run
pub struct Orchestrator {
    config: BackupConfig,
    storage: Box<dyn StorageClient>,
    runner: CommandRunner,
}

impl Orchestrator {
    pub fn new(config: BackupConfig, storage: Box<dyn StorageClient>, runner: CommandRunner) -> Self {
        Self {
            config,
            storage,
            runner,
        }
    }

    /// Build the storage client and command runner from the configuration
    pub fn from_config(config: BackupConfig, cancel: CancellationToken) -> Self {
        let runner = CommandRunner::new(config.job_timeout, cancel);
        let storage = open_storage(&config, runner.clone());
        Self::new(config, storage, runner)
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn run(&self, mode: RunMode) -> BackupResult<RunReport> {
        match mode {
            RunMode::List => self.list().map(RunReport::Listed),
            RunMode::DryRun => self.dry_run().map(RunReport::Validated),
            RunMode::Execute => self.execute().map(RunReport::Executed),
        }
    }

    /// Candidate repositories; touches neither the lock nor the store
    pub fn list(&self) -> BackupResult<Vec<RepositoryRef>> {
        Ok(self.scanner().scan()?.collect())
    }

    /// Validate everything `execute` needs without taking the lock
    pub fn dry_run(&self) -> BackupResult<DryRunReport> {
        self.preflight()?;
        let repositories = self.scanner().scan()?.count();

        Ok(DryRunReport {
            repo_root: self.config.repo_root.display().to_string(),
            destination: self.storage.uri(&self.config.repository_prefix("<repository>")),
            mode: self.config.mode,
            retention_days: self.config.retention_days,
            repositories,
            lock_path: self.config.lock_path.display().to_string(),
        })
    }

    /// Perform a full backup run
    pub fn execute(&self) -> BackupResult<RunResult> {
        let started = Instant::now();
        self.preflight()?;

        let lock = LockManager::new(self.config.lock_path.clone()).acquire()?;

        let mut result = RunResult::new(self.config.mode);
        let span = info_span!("run", run_id = %result.run_id);
        let _entered = span.enter();

        // Fixed at run start; a repository that disappears afterwards is a failure
        let repositories: Vec<RepositoryRef> = self.scanner().scan()?.collect();
        let timestamp = Local::now();
        let builder = ArchiveBuilder::new(&self.config, self.storage.as_ref(), self.runner.clone());
        let cancel = self.runner.cancel_token();

        info!(
            root = %self.config.repo_root.display(),
            destination = %self.storage.uri(&self.config.prefix),
            mode = %self.config.mode,
            repositories = repositories.len(),
            "backup run started"
        );

        let mut claimed: HashMap<String, PathBuf> = HashMap::new();

        for repository in repositories {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }

            if let Some(existing) = claimed.get(&repository.name) {
                let e = TransferError::NameCollision {
                    name: repository.name.clone(),
                    existing: existing.clone(),
                };
                error!(repository = %repository.path.display(), error = %e, "backup skipped");
                result.record_failure(&repository.name, &e);
                continue;
            }
            claimed.insert(repository.name.clone(), repository.path.clone());

            let job = BackupJob::new(repository, timestamp);
            match builder.transfer(&job) {
                Ok(artifact) => result.record_success(self.storage.uri(artifact.key())),
                Err(e) => {
                    error!(repository = %job.repository.name, error = %e, "backup failed");
                    result.record_failure(&job.repository.name, &e);
                    if matches!(e, TransferError::Cancelled) {
                        result.cancelled = true;
                        break;
                    }
                }
            }
        }

        if result.cancelled {
            warn!("run cancelled; retention sweep skipped");
        } else if self.config.retention_enabled() {
            self.sweep(&mut result);
        }

        lock.release();
        result.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            succeeded = result.succeeded,
            failed = result.failed,
            swept = result.swept,
            elapsed_ms = result.elapsed_ms,
            "backup run finished"
        );

        let history = RunHistory::new(self.config.history_path.clone());
        if let Err(e) = history.append(&result) {
            warn!(path = %history.path().display(), error = %e, "failed to record run history");
        }

        Ok(result)
    }

    fn sweep(&self, result: &mut RunResult) {
        let sweeper = RetentionSweeper::new(self.storage.as_ref());
        match sweeper.sweep(&self.config.prefix, self.config.retention_days) {
            Ok(report) => {
                result.swept = report.deleted_count();
                result
                    .sweep_failures
                    .extend(report.failures.into_iter().map(|f| f.key));
            }
            Err(e) => {
                error!(error = %e, "retention sweep failed");
                result.sweep_failures.push(e.to_string());
            }
        }
    }

    /// Fatal checks; nothing has been locked or written when these fail
    fn preflight(&self) -> BackupResult<()> {
        if !self.config.repo_root.is_dir() {
            return Err(BackupError::RootMissing(self.config.repo_root.clone()));
        }
        ArchiveBuilder::new(&self.config, self.storage.as_ref(), self.runner.clone()).preflight()?;
        self.storage.preflight()
    }

    fn scanner(&self) -> RepositoryScanner {
        RepositoryScanner::new(self.config.repo_root.clone())
    }
}
