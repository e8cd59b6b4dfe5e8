//! Configuration module for git-s3-backup
//!
//! This module provides configuration management including:
//! - Default path resolution (config file, lock, run history)
//! - Layered config loading (file, environment, command line)
//! - The immutable `BackupConfig` record handed to every component

pub mod paths;
pub mod settings;

pub use paths::BackupPaths;
pub use settings::{BackupConfig, Bucket, ConfigFile, TransferMode};
