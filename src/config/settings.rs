//! Backup configuration
//!
//! `ConfigFile` is the partially-filled shape read from disk and from the
//! command line; `BackupConfig` is the resolved, validated record that every
//! component receives. A `BackupConfig` is never mutated once a run starts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::paths::BackupPaths;
use crate::error::{BackupError, BackupResult};
use crate::logging::Severity;

/// How each repository is transferred to the object store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// One timestamped compressed snapshot per repository per run
    #[default]
    Archive,
    /// Keep `{prefix}/{repo}/latest/` in exact sync with the repository
    Mirror,
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Archive => write!(f, "archive"),
            Self::Mirror => write!(f, "mirror"),
        }
    }
}

/// Destination bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bucket {
    /// An S3-compatible bucket, reached through the `aws` CLI
    S3(String),
    /// A local directory acting as a bucket (`file:///path`)
    Local(PathBuf),
}

impl Bucket {
    /// Parse `s3://name`, `name` or `file:///abs/path`
    pub fn parse(raw: &str) -> BackupResult<Self> {
        let raw = raw.trim();
        if let Some(path) = raw.strip_prefix("file://") {
            let path = PathBuf::from(path);
            if !path.is_absolute() {
                return Err(BackupError::Config(format!(
                    "file:// bucket must be an absolute path: {}",
                    raw
                )));
            }
            return Ok(Self::Local(path));
        }

        let name = raw.strip_prefix("s3://").unwrap_or(raw).trim_end_matches('/');
        if name.is_empty() {
            return Err(BackupError::Config("bucket is not set".into()));
        }
        if name.contains('/') {
            return Err(BackupError::Config(format!(
                "bucket name must not contain '/': {} (use the prefix setting)",
                raw
            )));
        }
        Ok(Self::S3(name.to_string()))
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S3(name) => write!(f, "s3://{}", name),
            Self::Local(path) => write!(f, "file://{}", path.display()),
        }
    }
}

/// Configuration as read from a file or the command line
///
/// Every field is optional so that sources can be layered with `merge`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub repo_root: Option<PathBuf>,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    /// Credentials profile handed to the storage client
    #[serde(default)]
    pub profile: Option<String>,
    /// Endpoint for S3-compatible stores other than AWS
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub retention_days: Option<i64>,
    #[serde(default)]
    pub mode: Option<TransferMode>,
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,
    #[serde(default)]
    pub lock_path: Option<PathBuf>,
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    #[serde(default)]
    pub history_path: Option<PathBuf>,
    #[serde(default)]
    pub log_level: Option<Severity>,
}

impl ConfigFile {
    /// Load a config file; `.yaml`/`.yml` are parsed as YAML, anything else as JSON
    pub fn load(path: &Path) -> BackupResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            BackupError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_yaml = path
            .extension()
            .map_or(false, |ext| ext == "yaml" || ext == "yml");

        if is_yaml {
            serde_yaml::from_str(&contents).map_err(|e| {
                BackupError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })
        } else {
            serde_json::from_str(&contents).map_err(|e| {
                BackupError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })
        }
    }

    /// Layer `overrides` on top of `self`; set fields in `overrides` win
    pub fn merge(self, overrides: ConfigFile) -> ConfigFile {
        ConfigFile {
            repo_root: overrides.repo_root.or(self.repo_root),
            bucket: overrides.bucket.or(self.bucket),
            prefix: overrides.prefix.or(self.prefix),
            profile: overrides.profile.or(self.profile),
            endpoint_url: overrides.endpoint_url.or(self.endpoint_url),
            retention_days: overrides.retention_days.or(self.retention_days),
            mode: overrides.mode.or(self.mode),
            job_timeout_secs: overrides.job_timeout_secs.or(self.job_timeout_secs),
            lock_path: overrides.lock_path.or(self.lock_path),
            scratch_dir: overrides.scratch_dir.or(self.scratch_dir),
            history_path: overrides.history_path.or(self.history_path),
            log_level: overrides.log_level.or(self.log_level),
        }
    }

    /// Apply defaults and validate into a `BackupConfig`
    pub fn resolve(self, paths: &BackupPaths) -> BackupResult<BackupConfig> {
        let repo_root = self
            .repo_root
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| BackupError::Config("repository root is not set".into()))?;

        let bucket = Bucket::parse(self.bucket.as_deref().unwrap_or(""))?;

        let prefix = self
            .prefix
            .unwrap_or_else(default_prefix)
            .trim_matches('/')
            .to_string();
        if prefix.split('/').any(|segment| segment == "..") {
            return Err(BackupError::Config(format!(
                "prefix must not contain '..': {}",
                prefix
            )));
        }

        let config = BackupConfig {
            repo_root,
            bucket,
            prefix,
            profile: self.profile.filter(|p| !p.is_empty()),
            endpoint_url: self.endpoint_url.filter(|u| !u.is_empty()),
            retention_days: self.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS),
            mode: self.mode.unwrap_or_default(),
            job_timeout: self
                .job_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            lock_path: self.lock_path.unwrap_or_else(|| paths.lock_file()),
            scratch_dir: self.scratch_dir.unwrap_or_else(std::env::temp_dir),
            history_path: self.history_path.unwrap_or_else(|| paths.history_file()),
            log_level: self.log_level.unwrap_or_default(),
        };

        Ok(config)
    }
}

const DEFAULT_RETENTION_DAYS: i64 = 30;

fn default_prefix() -> String {
    "git-backups".to_string()
}

/// Resolved configuration for one run
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Directory whose immediate children are the repositories
    pub repo_root: PathBuf,
    pub bucket: Bucket,
    /// Key prefix, without leading or trailing slashes (may be empty)
    pub prefix: String,
    pub profile: Option<String>,
    pub endpoint_url: Option<String>,
    /// Age limit for archives; zero or negative disables the sweep
    pub retention_days: i64,
    pub mode: TransferMode,
    pub job_timeout: Option<Duration>,
    pub lock_path: PathBuf,
    pub scratch_dir: PathBuf,
    pub history_path: PathBuf,
    pub log_level: Severity,
}

impl BackupConfig {
    /// Key under which everything for one repository lives
    pub fn repository_prefix(&self, repository: &str) -> String {
        join_key(&self.prefix, repository)
    }

    /// Key of a named artifact: `{prefix}/{repository}/{artifact}`
    pub fn artifact_key(&self, repository: &str, artifact: &str) -> String {
        join_key(&self.repository_prefix(repository), artifact)
    }

    /// Mirror destination: `{prefix}/{repository}/latest`
    pub fn mirror_key(&self, repository: &str) -> String {
        join_key(&self.repository_prefix(repository), MIRROR_DIR)
    }

    pub fn retention_enabled(&self) -> bool {
        self.retention_days > 0
    }
}

/// Final key segment of mirror-mode destinations
pub const MIRROR_DIR: &str = "latest";

fn join_key(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", base, name)
    }
}
