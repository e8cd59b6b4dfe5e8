//! Object store access
//!
//! Backup code talks to the destination only through the narrow
//! `StorageClient` trait. Two clients exist:
//!
//! - `AwsCliStorage`: any S3-compatible store, driven through the `aws` CLI
//!   so credentials and profiles resolve exactly as they do for operators
//! - `LocalStorage`: a directory standing in for a bucket (`file://` URIs),
//!   for NAS targets and for tests
//!
//! Keys are `/`-separated and never start with a slash.

mod aws_cli;
mod local;

use std::path::Path;

use chrono::NaiveDateTime;

use crate::config::{BackupConfig, Bucket};
use crate::error::BackupResult;
use crate::exec::CommandRunner;

pub use aws_cli::AwsCliStorage;
pub use local::LocalStorage;

/// One object returned by a listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Full key, relative to the bucket
    pub key: String,
    /// Last modification time as reported by the store (local time)
    pub last_modified: NaiveDateTime,
    pub size: u64,
}

/// Put/list/delete operations against one bucket
pub trait StorageClient: Send {
    /// Upload a single local file to `key`
    fn put_file(&self, local: &Path, key: &str) -> BackupResult<()>;

    /// Make everything under `key_prefix` an exact copy of `local_dir`,
    /// deleting objects that have no counterpart in the source
    fn sync_dir(&self, local_dir: &Path, key_prefix: &str) -> BackupResult<()>;

    /// List every object whose key starts with `prefix`
    fn list(&self, prefix: &str) -> BackupResult<Vec<ObjectEntry>>;

    /// Delete one object; deleting a missing key is not an error
    fn delete(&self, key: &str) -> BackupResult<()>;

    /// Human-readable location of `key`, for reports
    fn uri(&self, key: &str) -> String;

    /// Verify the client can operate (tooling installed, bucket reachable)
    fn preflight(&self) -> BackupResult<()>;
}

/// Build the client matching the configured bucket
pub fn open_storage(config: &BackupConfig, runner: CommandRunner) -> Box<dyn StorageClient> {
    match &config.bucket {
        Bucket::S3(name) => Box::new(AwsCliStorage::new(
            name.clone(),
            config.profile.clone(),
            config.endpoint_url.clone(),
            runner,
        )),
        Bucket::Local(root) => Box::new(LocalStorage::new(root.clone())),
    }
}

/// Listing prefix that matches `prefix` as a directory, not as a key stem
pub fn dir_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}
