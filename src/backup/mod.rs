//! Backup orchestration
//!
//! # Architecture
//!
//! - `LockManager`: at most one run per lock path; stale locks are replaced
//! - `RepositoryScanner`: finds bare repositories under the root
//! - `ArchiveBuilder`: archives (or mirrors) one repository into the store
//! - `RetentionSweeper`: deletes archives older than the retention period
//! - `Orchestrator`: runs the above in order and aggregates a `RunResult`
//! - `RunHistory`: append-only log of past `RunResult`s
//!
//! # Example
//!
//! ```rust,ignore
//! use gitbackup::backup::{Orchestrator, RunMode};
//! use tokio_util::sync::CancellationToken;
//!
//! let orchestrator = Orchestrator::from_config(config, CancellationToken::new());
//! let result = orchestrator.execute()?;
//! println!("{} succeeded, {} failed", result.succeeded, result.failed);
//! ```

mod archive;
mod history;
mod lock;
mod orchestrator;
mod retention;
mod scanner;

pub use archive::{ArchiveBuilder, Artifact, BackupJob, ARCHIVE_EXTENSION};
pub use history::RunHistory;
pub use lock::{process_alive, LockGuard, LockManager, LockRecord};
pub use orchestrator::{DryRunReport, JobFailure, Orchestrator, RunMode, RunReport, RunResult};
pub use retention::{cutoff_date, RetentionSweeper, SweepFailure, SweepReport};
pub use scanner::{RepositoryKind, RepositoryRef, RepositoryScanner, Scan, BARE_SUFFIX};

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};

    use chrono::{Local, NaiveDate, NaiveDateTime};

    use crate::config::{BackupConfig, Bucket, TransferMode};
    use crate::error::{BackupError, BackupResult};
    use crate::logging::Severity;
    use crate::storage::{ObjectEntry, StorageClient};

    /// Config rooted in `base`, with the repository root and scratch dir created
    pub fn test_config(base: &Path, mode: TransferMode) -> BackupConfig {
        let repo_root = base.join("repos");
        let scratch_dir = base.join("scratch");
        fs::create_dir_all(&repo_root).unwrap();
        fs::create_dir_all(&scratch_dir).unwrap();

        BackupConfig {
            repo_root,
            bucket: Bucket::Local(base.join("bucket")),
            prefix: "git-backups".into(),
            profile: None,
            endpoint_url: None,
            retention_days: 30,
            mode,
            job_timeout: None,
            lock_path: base.join("state/run.lock"),
            scratch_dir,
            history_path: base.join("state/history.jsonl"),
            log_level: Severity::Debug,
        }
    }

    #[derive(Default)]
    struct State {
        objects: BTreeMap<String, ObjectEntry>,
        fail_puts: Option<String>,
        fail_deletes: Option<String>,
        remove_on_put: Option<(String, PathBuf)>,
        list_calls: usize,
        mutations: usize,
    }

    /// In-memory `StorageClient`; clones share state
    #[derive(Clone, Default)]
    pub struct MemoryStorage {
        state: Arc<Mutex<State>>,
    }

    impl MemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn fail_puts_matching(self, needle: &str) -> Self {
            self.state.lock().unwrap().fail_puts = Some(needle.to_string());
            self
        }

        pub fn fail_deletes_matching(self, needle: &str) -> Self {
            self.state.lock().unwrap().fail_deletes = Some(needle.to_string());
            self
        }

        /// Delete `dir` from disk while a put whose key contains `needle` is in flight
        pub fn remove_dir_on_put(self, needle: &str, dir: &Path) -> Self {
            self.state.lock().unwrap().remove_on_put = Some((needle.to_string(), dir.to_path_buf()));
            self
        }

        /// Seed an object as if written on `date`
        pub fn insert(&self, key: &str, date: NaiveDate) {
            let entry = ObjectEntry {
                key: key.to_string(),
                last_modified: date.and_hms_opt(3, 0, 0).unwrap(),
                size: 1,
            };
            self.state.lock().unwrap().objects.insert(key.to_string(), entry);
        }

        pub fn keys(&self) -> Vec<String> {
            self.state.lock().unwrap().objects.keys().cloned().collect()
        }

        pub fn list_calls(&self) -> usize {
            self.state.lock().unwrap().list_calls
        }

        pub fn mutations(&self) -> usize {
            self.state.lock().unwrap().mutations
        }

        fn now() -> NaiveDateTime {
            Local::now().naive_local()
        }
    }

    fn files_below(dir: &Path, out: &mut Vec<PathBuf>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                files_below(&path, out);
            } else {
                out.push(path);
            }
        }
    }

    impl StorageClient for MemoryStorage {
        fn put_file(&self, local: &Path, key: &str) -> BackupResult<()> {
            let mut state = self.state.lock().unwrap();
            state.mutations += 1;
            if let Some((needle, dir)) = &state.remove_on_put {
                if key.contains(needle.as_str()) {
                    fs::remove_dir_all(dir)?;
                }
            }
            if state.fail_puts.as_deref().map_or(false, |n| key.contains(n)) {
                return Err(BackupError::Storage(format!("put rejected: {}", key)));
            }
            let size = fs::metadata(local)?.len();
            state.objects.insert(
                key.to_string(),
                ObjectEntry {
                    key: key.to_string(),
                    last_modified: Self::now(),
                    size,
                },
            );
            Ok(())
        }

        fn sync_dir(&self, local_dir: &Path, key_prefix: &str) -> BackupResult<()> {
            let mut files = Vec::new();
            files_below(local_dir, &mut files);

            let mut state = self.state.lock().unwrap();
            state.mutations += 1;
            let prefix = format!("{}/", key_prefix);
            state.objects.retain(|key, _| !key.starts_with(&prefix));
            for file in files {
                let relative = file.strip_prefix(local_dir).unwrap().to_string_lossy().into_owned();
                let key = format!("{}{}", prefix, relative);
                state.objects.insert(
                    key.clone(),
                    ObjectEntry {
                        key,
                        last_modified: Self::now(),
                        size: fs::metadata(&file)?.len(),
                    },
                );
            }
            Ok(())
        }

        fn list(&self, prefix: &str) -> BackupResult<Vec<ObjectEntry>> {
            let mut state = self.state.lock().unwrap();
            state.list_calls += 1;
            Ok(state
                .objects
                .values()
                .filter(|entry| entry.key.starts_with(prefix))
                .cloned()
                .collect())
        }

        fn delete(&self, key: &str) -> BackupResult<()> {
            let mut state = self.state.lock().unwrap();
            state.mutations += 1;
            if state.fail_deletes.as_deref().map_or(false, |n| key.contains(n)) {
                return Err(BackupError::Storage(format!("delete rejected: {}", key)));
            }
            state.objects.remove(key);
            Ok(())
        }

        fn uri(&self, key: &str) -> String {
            format!("memory://{}", key)
        }

        fn preflight(&self) -> BackupResult<()> {
            Ok(())
        }
    }
}
