//! git-s3-backup - back up a host's bare git repositories to object storage
//!
//! Finds every bare repository under a root directory and copies each one to
//! an S3-compatible bucket, either as a timestamped `.tar.gz` archive or as a
//! mirrored directory tree. Old archives are swept after each run, and a lock
//! file keeps overlapping runs apart.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration records and path management
//! - `error`: Custom error types
//! - `logging`: Log severity and subscriber setup
//! - `exec`: External command runner with timeout and cancellation
//! - `storage`: Object store clients (`aws` CLI, local directory)
//! - `backup`: Locking, discovery, transfer, retention and orchestration
//! - `cli`: Command-line flags and command handlers
//! - `display`: Plain-text report formatting
//!
//! # Example
//!
//! ```rust,ignore
//! use gitbackup::backup::Orchestrator;
//! use gitbackup::config::{BackupPaths, ConfigFile};
//! use tokio_util::sync::CancellationToken;
//!
//! let paths = BackupPaths::new()?;
//! let config = ConfigFile::load(&paths.config_file())?.resolve(&paths)?;
//! let result = Orchestrator::from_config(config, CancellationToken::new()).execute()?;
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod exec;
pub mod logging;
pub mod storage;

pub use error::{BackupError, BackupResult};
