use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, instrument};

use super::{ObjectEntry, StorageClient};
use crate::error::{BackupError, BackupResult};

/// Suffix of an in-flight copy; never a stored object
const PARTIAL_SUFFIX: &str = ".partial";

/// A directory used as a bucket; keys map to relative paths under it
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }
}

impl StorageClient for LocalStorage {
    #[instrument(skip(self))]
    fn put_file(&self, local: &Path, key: &str) -> BackupResult<()> {
        copy_atomic(local, &self.path_for(key)).map_err(|e| {
            BackupError::Storage(format!("Failed to store {}: {}", key, e))
        })?;
        debug!("stored");
        Ok(())
    }

    #[instrument(skip(self))]
    fn sync_dir(&self, local_dir: &Path, key_prefix: &str) -> BackupResult<()> {
        let dest_root = self.path_for(key_prefix);
        let storage_err =
            |e: io::Error| BackupError::Storage(format!("Failed to sync {}: {}", key_prefix, e));

        let mut source_files = Vec::new();
        walk_files(local_dir, &mut source_files).map_err(storage_err)?;

        let mut wanted = HashSet::new();
        let mut copied = 0usize;
        for source in &source_files {
            let relative = source.strip_prefix(local_dir).unwrap_or(source);
            let dest = dest_root.join(relative);
            if needs_copy(source, &dest).map_err(storage_err)? {
                copy_atomic(source, &dest).map_err(storage_err)?;
                copied += 1;
            }
            wanted.insert(dest);
        }

        let mut existing = Vec::new();
        if dest_root.is_dir() {
            walk_files(&dest_root, &mut existing).map_err(storage_err)?;
        }
        let mut removed = 0usize;
        for stale in existing.iter().filter(|p| !wanted.contains(*p)) {
            fs::remove_file(stale).map_err(storage_err)?;
            removed += 1;
        }
        if dest_root.is_dir() {
            prune_empty_dirs(&dest_root).map_err(storage_err)?;
        }

        debug!(copied, removed, "mirror synced");
        Ok(())
    }

    #[instrument(skip(self))]
    fn list(&self, prefix: &str) -> BackupResult<Vec<ObjectEntry>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        walk_files(&self.root, &mut files)
            .map_err(|e| BackupError::Storage(format!("Failed to list bucket: {}", e)))?;

        let mut entries = Vec::new();
        for path in files {
            let Some(key) = key_for(&self.root, &path) else {
                continue;
            };
            if !key.starts_with(prefix) || key.ends_with(PARTIAL_SUFFIX) {
                continue;
            }
            // Deleted by a concurrent put or sweep since the walk
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let modified: DateTime<Local> = metadata.modified()?.into();
            entries.push(ObjectEntry {
                key,
                last_modified: modified.naive_local(),
                size: metadata.len(),
            });
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    #[instrument(skip(self))]
    fn delete(&self, key: &str) -> BackupResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BackupError::Storage(format!(
                "Failed to delete {}: {}",
                key, e
            ))),
        }
    }

    fn uri(&self, key: &str) -> String {
        format!("file://{}", self.path_for(key).display())
    }

    fn preflight(&self) -> BackupResult<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(BackupError::Config(format!(
                "bucket directory does not exist: {}",
                self.root.display()
            )))
        }
    }
}

/// Copy through a sibling temp file and rename into place
fn copy_atomic(source: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut partial = dest.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    let partial = PathBuf::from(partial);

    fs::copy(source, &partial)?;
    fs::rename(&partial, dest).map_err(|e| {
        let _ = fs::remove_file(&partial);
        e
    })
}

fn needs_copy(source: &Path, dest: &Path) -> io::Result<bool> {
    let dest_meta = match fs::metadata(dest) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e),
    };
    let source_meta = fs::metadata(source)?;

    Ok(source_meta.len() != dest_meta.len() || source_meta.modified()? > dest_meta.modified()?)
}

/// Collect regular files below `dir`, recursively; symlinks are skipped
fn walk_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk_files(&entry.path(), out)?;
        } else if file_type.is_file() {
            out.push(entry.path());
        }
    }
    Ok(())
}

/// Remove empty directories below `dir` (but not `dir` itself)
fn prune_empty_dirs(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let path = entry.path();
            prune_empty_dirs(&path)?;
            if fs::read_dir(&path)?.next().is_none() {
                fs::remove_dir(&path)?;
            }
        }
    }
    Ok(())
}

fn key_for(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let segments: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (LocalStorage, TempDir, TempDir) {
        let bucket = TempDir::new().unwrap();
        let source = TempDir::new().unwrap();
        (LocalStorage::new(bucket.path().to_path_buf()), bucket, source)
    }

    #[test]
    fn test_put_and_list() {
        let (storage, bucket, source) = setup();
        let file = source.path().join("alpha.tar.gz");
        fs::write(&file, b"archive").unwrap();

        storage.put_file(&file, "git-backups/alpha/alpha.tar.gz").unwrap();
        assert!(bucket.path().join("git-backups/alpha/alpha.tar.gz").exists());
        assert!(!bucket.path().join("git-backups/alpha/alpha.tar.gz.partial").exists());

        let entries = storage.list("git-backups/").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "git-backups/alpha/alpha.tar.gz");
        assert_eq!(entries[0].size, 7);

        assert!(storage.list("other/").unwrap().is_empty());
    }

    #[test]
    fn test_list_skips_in_flight_copies() {
        let (storage, bucket, source) = setup();
        let file = source.path().join("alpha.tar.gz");
        fs::write(&file, b"archive").unwrap();
        storage.put_file(&file, "git-backups/alpha/alpha_1.tar.gz").unwrap();

        // Left behind by an interrupted copy
        let stray = bucket.path().join("git-backups/alpha/alpha_2.tar.gz.partial");
        fs::write(&stray, b"arch").unwrap();

        let keys: Vec<String> = storage
            .list("git-backups/")
            .unwrap()
            .into_iter()
            .map(|e| e.key)
            .collect();
        assert_eq!(keys, vec!["git-backups/alpha/alpha_1.tar.gz".to_string()]);
    }

    #[test]
    fn test_delete_missing_is_ok() {
        let (storage, _bucket, _source) = setup();
        storage.delete("nope/missing.tar.gz").unwrap();
    }

    #[test]
    fn test_sync_dir_mirrors_and_deletes() {
        let (storage, bucket, source) = setup();
        fs::create_dir_all(source.path().join("refs/heads")).unwrap();
        fs::write(source.path().join("HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(source.path().join("refs/heads/main"), "abc\n").unwrap();

        let dest = bucket.path().join("p/alpha/latest");
        fs::create_dir_all(dest.join("old")).unwrap();
        fs::write(dest.join("old/stale"), "x").unwrap();

        storage.sync_dir(source.path(), "p/alpha/latest").unwrap();

        assert_eq!(
            fs::read_to_string(dest.join("HEAD")).unwrap(),
            "ref: refs/heads/main\n"
        );
        assert!(dest.join("refs/heads/main").exists());
        assert!(!dest.join("old/stale").exists());
        assert!(!dest.join("old").exists());

        // Removing from the source removes from the destination
        fs::remove_file(source.path().join("refs/heads/main")).unwrap();
        storage.sync_dir(source.path(), "p/alpha/latest").unwrap();
        assert!(!dest.join("refs/heads/main").exists());
        assert!(dest.join("HEAD").exists());
    }

    #[test]
    fn test_preflight_requires_directory() {
        let storage = LocalStorage::new(PathBuf::from("/definitely/not/here"));
        assert!(matches!(storage.preflight(), Err(BackupError::Config(_))));
        assert!(storage.list("").unwrap().is_empty());
    }

    #[test]
    fn test_uri() {
        let storage = LocalStorage::new(PathBuf::from("/mnt/nas"));
        assert_eq!(storage.uri("a/b.tar.gz"), "file:///mnt/nas/a/b.tar.gz");
    }
}
