//! Single-instance run lock
//!
//! The lock is a small file at a well-known path holding the holder's pid
//! and acquisition time. It is created atomically (written to a temp file,
//! then hard-linked into place, which fails if the lock already exists).
//! A lock whose holder is no longer alive is stale and is replaced.
//!
//! `LockGuard` removes the lock when dropped, so every exit path out of a
//! run (success, error, panic unwind, cancellation) releases it.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{BackupError, BackupResult};

/// Contents of the lock file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockRecord {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    /// First line is the pid; the second, when present, is an RFC 3339 timestamp
    pub fn parse(contents: &str) -> Option<Self> {
        let mut lines = contents.lines();
        let pid = lines.next()?.trim().parse().ok()?;
        let acquired_at = lines
            .next()
            .and_then(|line| DateTime::parse_from_rfc3339(line.trim()).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_default();
        Some(Self { pid, acquired_at })
    }

    fn render(&self) -> String {
        format!("{}\n{}\n", self.pid, self.acquired_at.to_rfc3339())
    }
}

/// Acquires the run lock at one path
pub struct LockManager {
    path: PathBuf,
}

impl LockManager {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current lock record, if any
    pub fn holder(&self) -> BackupResult<Option<LockRecord>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(LockRecord::parse(&contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BackupError::Lock(format!(
                "Failed to read lock {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    /// Take the lock, discarding it first if its holder is dead
    ///
    /// Fails with `AlreadyRunning` if a live process holds it. Never waits.
    pub fn acquire(&self) -> BackupResult<LockGuard> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BackupError::Lock(format!(
                    "Failed to create lock directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let record = LockRecord::current();

        if self.try_create(&record)? {
            return Ok(self.guard(record));
        }

        let existing = fs::read_to_string(&self.path).unwrap_or_default();
        match LockRecord::parse(&existing) {
            Some(holder) if process_alive(holder.pid) => {
                return Err(BackupError::AlreadyRunning { pid: holder.pid });
            }
            Some(holder) => {
                warn!(pid = holder.pid, path = %self.path.display(), "discarding stale lock");
            }
            None => {
                warn!(path = %self.path.display(), "discarding unreadable lock");
            }
        }

        self.remove_if_unchanged(&existing)?;

        if self.try_create(&record)? {
            return Ok(self.guard(record));
        }

        // Lost a race with another process that also saw the stale lock
        let pid = self.holder()?.map(|h| h.pid).unwrap_or(0);
        Err(BackupError::AlreadyRunning { pid })
    }

    fn guard(&self, record: LockRecord) -> LockGuard {
        info!(pid = record.pid, path = %self.path.display(), "lock acquired");
        LockGuard {
            path: self.path.clone(),
            record,
            released: false,
        }
    }

    /// Create the lock with full contents in one step; false if it exists
    fn try_create(&self, record: &LockRecord) -> BackupResult<bool> {
        let lock_err = |e: io::Error| {
            BackupError::Lock(format!("Failed to write lock {}: {}", self.path.display(), e))
        };

        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(format!(".{}.tmp", record.pid));
        let temp_path = PathBuf::from(temp_name);

        let mut file = fs::File::create(&temp_path).map_err(lock_err)?;
        let written = file
            .write_all(record.render().as_bytes())
            .and_then(|_| file.sync_all());
        drop(file);

        let linked = written.and_then(|_| fs::hard_link(&temp_path, &self.path));
        let _ = fs::remove_file(&temp_path);

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(lock_err(e)),
        }
    }

    fn remove_if_unchanged(&self, seen: &str) -> BackupResult<()> {
        let current = fs::read_to_string(&self.path).unwrap_or_default();
        if current != seen {
            return Ok(());
        }
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackupError::Lock(format!(
                "Failed to remove stale lock {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

/// Held lock; removes the lock file on drop
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    record: LockRecord,
    released: bool,
}

impl LockGuard {
    /// Release now instead of at drop
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        // Only remove the lock if it is still ours
        let ours = fs::read_to_string(&self.path)
            .ok()
            .and_then(|c| LockRecord::parse(&c))
            .map_or(false, |r| r.pid == self.record.pid);

        if !ours {
            warn!(path = %self.path.display(), "lock no longer held by this process");
            return;
        }

        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "lock released"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to release lock"),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Whether a process with this pid is running
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    pid != 0 && Path::new("/proc").join(pid.to_string()).exists()
}

/// Whether a process with this pid is running
#[cfg(all(unix, not(target_os = "linux")))]
pub fn process_alive(pid: u32) -> bool {
    pid != 0
        && std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map_or(true, |s| s.success())
}

/// Whether a process with this pid is running
///
/// Without a liveness check every recorded holder is assumed alive.
#[cfg(not(unix))]
pub fn process_alive(pid: u32) -> bool {
    pid != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Above the kernel's maximum pid, so never alive
    const DEAD_PID: u32 = 999_999_999;

    fn manager() -> (LockManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let manager = LockManager::new(temp_dir.path().join("run.lock"));
        (manager, temp_dir)
    }

    #[test]
    fn test_acquire_writes_pid_and_releases_on_drop() {
        let (manager, _temp) = manager();

        {
            let _guard = manager.acquire().unwrap();

            let holder = manager.holder().unwrap().unwrap();
            assert_eq!(holder.pid, std::process::id());
        }

        assert!(!manager.path().exists());
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let (manager, _temp) = manager();
        let _guard = manager.acquire().unwrap();

        let err = manager.acquire().unwrap_err();
        match err {
            BackupError::AlreadyRunning { pid } => assert_eq!(pid, std::process::id()),
            other => panic!("unexpected error: {other}"),
        }

        // The failed attempt must not disturb the held lock
        assert_eq!(manager.holder().unwrap().unwrap().pid, std::process::id());
    }

    #[test]
    fn test_stale_lock_is_discarded() {
        let (manager, _temp) = manager();
        fs::write(manager.path(), format!("{}\n", DEAD_PID)).unwrap();

        let guard = manager.acquire().unwrap();
        assert_eq!(manager.holder().unwrap().unwrap().pid, std::process::id());
        guard.release();
        assert!(!manager.path().exists());
    }

    #[test]
    fn test_unreadable_lock_is_discarded() {
        let (manager, _temp) = manager();
        fs::write(manager.path(), "garbage").unwrap();

        let _guard = manager.acquire().unwrap();
        assert_eq!(manager.holder().unwrap().unwrap().pid, std::process::id());
    }

    #[test]
    fn test_guard_leaves_foreign_lock_alone() {
        let (manager, _temp) = manager();
        let guard = manager.acquire().unwrap();

        // Someone replaced the lock underneath us
        fs::write(manager.path(), format!("{}\n", DEAD_PID)).unwrap();
        drop(guard);

        assert!(manager.path().exists());
    }

    #[test]
    fn test_release_on_panic() {
        let (manager, _temp) = manager();
        let path = manager.path().to_path_buf();

        let result = std::panic::catch_unwind(|| {
            let _guard = manager.acquire().unwrap();
            panic!("job blew up");
        });

        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_parse_record() {
        let record = LockRecord::parse("1234\n2025-03-01T02:00:00+00:00\n").unwrap();
        assert_eq!(record.pid, 1234);
        assert_eq!(record.acquired_at.to_rfc3339(), "2025-03-01T02:00:00+00:00");

        let bare = LockRecord::parse("77").unwrap();
        assert_eq!(bare.pid, 77);
        assert!(LockRecord::parse("").is_none());
        assert!(LockRecord::parse("abc").is_none());
    }

    #[test]
    fn test_process_alive() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(0));
    }
}
