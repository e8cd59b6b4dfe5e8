//! Command-line configuration flags
//!
//! Every flag can also be supplied through a `GIT_S3_BACKUP_*` environment
//! variable. Flags override the config file, which overrides the defaults.

use std::path::PathBuf;

use clap::Args;

use crate::config::{BackupConfig, BackupPaths, ConfigFile, TransferMode};
use crate::error::BackupResult;
use crate::logging::Severity;

/// Flags shared by every subcommand
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Config file (JSON, or YAML with a .yaml/.yml extension)
    #[arg(long, global = true, env = "GIT_S3_BACKUP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the bare repositories
    #[arg(long, global = true, env = "GIT_S3_BACKUP_REPO_ROOT")]
    pub repo_root: Option<PathBuf>,

    /// Destination bucket: s3://name, name, or file:///abs/path
    #[arg(long, global = true, env = "GIT_S3_BACKUP_BUCKET")]
    pub bucket: Option<String>,

    /// Key prefix inside the bucket
    #[arg(long, global = true, env = "GIT_S3_BACKUP_PREFIX")]
    pub prefix: Option<String>,

    /// Credentials profile for the storage client
    #[arg(long, global = true, env = "GIT_S3_BACKUP_PROFILE")]
    pub profile: Option<String>,

    /// Endpoint for S3-compatible stores
    #[arg(long, global = true, env = "GIT_S3_BACKUP_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Delete archives older than this many days (0 disables)
    #[arg(
        long,
        global = true,
        env = "GIT_S3_BACKUP_RETENTION_DAYS",
        allow_negative_numbers = true
    )]
    pub retention_days: Option<i64>,

    /// Transfer mode
    #[arg(long, global = true, value_enum, env = "GIT_S3_BACKUP_MODE")]
    pub mode: Option<TransferMode>,

    /// Per-command timeout in seconds (0 disables)
    #[arg(long, global = true, env = "GIT_S3_BACKUP_JOB_TIMEOUT")]
    pub job_timeout: Option<u64>,

    /// Lock file location
    #[arg(long, global = true, env = "GIT_S3_BACKUP_LOCK_PATH")]
    pub lock_path: Option<PathBuf>,

    /// Directory for temporary archives
    #[arg(long, global = true, env = "GIT_S3_BACKUP_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Run history file
    #[arg(long, global = true, env = "GIT_S3_BACKUP_HISTORY_PATH")]
    pub history_path: Option<PathBuf>,

    /// Minimum log severity (RUST_LOG takes precedence)
    #[arg(long, global = true, value_enum, env = "GIT_S3_BACKUP_LOG_LEVEL")]
    pub log_level: Option<Severity>,

    /// Emit logs as JSON
    #[arg(long, global = true, env = "GIT_S3_BACKUP_LOG_JSON")]
    pub log_json: bool,

    /// Print reports as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

impl ConfigArgs {
    /// The settings given on the command line, as a mergeable layer
    pub fn overrides(&self) -> ConfigFile {
        ConfigFile {
            repo_root: self.repo_root.clone(),
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            profile: self.profile.clone(),
            endpoint_url: self.endpoint_url.clone(),
            retention_days: self.retention_days,
            mode: self.mode,
            job_timeout_secs: self.job_timeout,
            lock_path: self.lock_path.clone(),
            scratch_dir: self.scratch_dir.clone(),
            history_path: self.history_path.clone(),
            log_level: self.log_level,
        }
    }

    /// Layer defaults, the config file and these flags
    ///
    /// An explicit `--config` must exist; the default location is optional.
    pub fn resolve(&self, paths: &BackupPaths) -> BackupResult<BackupConfig> {
        let file = match &self.config {
            Some(path) => ConfigFile::load(path)?,
            None => {
                let default = paths.config_file();
                if default.exists() {
                    ConfigFile::load(&default)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        file.merge(self.overrides()).resolve(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Bucket;
    use crate::error::BackupError;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_config_file() {
        let temp = TempDir::new().unwrap();
        let paths = BackupPaths::with_base_dir(temp.path().to_path_buf());
        fs::create_dir_all(paths.config_dir()).unwrap();
        fs::write(
            paths.config_file(),
            r#"{"repo_root": "/srv/git", "bucket": "from-file", "retention_days": 7}"#,
        )
        .unwrap();

        let args = ConfigArgs {
            bucket: Some("s3://from-flag".into()),
            mode: Some(TransferMode::Mirror),
            ..Default::default()
        };
        let config = args.resolve(&paths).unwrap();

        assert_eq!(config.repo_root, PathBuf::from("/srv/git"));
        assert_eq!(config.bucket, Bucket::S3("from-flag".into()));
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.mode, TransferMode::Mirror);
        assert_eq!(config.lock_path, paths.lock_file());
    }

    #[test]
    fn test_explicit_config_must_exist() {
        let temp = TempDir::new().unwrap();
        let paths = BackupPaths::with_base_dir(temp.path().to_path_buf());
        let args = ConfigArgs {
            config: Some(temp.path().join("missing.yaml")),
            ..Default::default()
        };

        let err = args.resolve(&paths).unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }

    #[test]
    fn test_flags_alone_are_enough() {
        let temp = TempDir::new().unwrap();
        let paths = BackupPaths::with_base_dir(temp.path().to_path_buf());
        let args = ConfigArgs {
            repo_root: Some("/srv/git".into()),
            bucket: Some("backups".into()),
            job_timeout: Some(0),
            ..Default::default()
        };

        let config = args.resolve(&paths).unwrap();
        assert_eq!(config.prefix, "git-backups");
        assert!(config.job_timeout.is_none());
    }
}
