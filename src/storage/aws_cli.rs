use std::path::Path;

use chrono::NaiveDateTime;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::{ObjectEntry, StorageClient};
use crate::error::BackupResult;
use crate::exec::{self, CommandRunner, ExecError};

/// S3-compatible bucket accessed through the `aws` command line tool
pub struct AwsCliStorage {
    bucket: String,
    profile: Option<String>,
    endpoint_url: Option<String>,
    runner: CommandRunner,
}

impl AwsCliStorage {
    pub fn new(
        bucket: String,
        profile: Option<String>,
        endpoint_url: Option<String>,
        runner: CommandRunner,
    ) -> Self {
        Self {
            bucket,
            profile,
            endpoint_url,
            runner,
        }
    }

    /// `aws [--profile P] [--endpoint-url U] s3 <args...>`
    fn s3_command(&self) -> Command {
        let mut cmd = Command::new("aws");
        if let Some(profile) = &self.profile {
            cmd.arg("--profile").arg(profile);
        }
        if let Some(endpoint) = &self.endpoint_url {
            cmd.arg("--endpoint-url").arg(endpoint);
        }
        cmd.arg("s3");
        cmd
    }
}

impl StorageClient for AwsCliStorage {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    fn put_file(&self, local: &Path, key: &str) -> BackupResult<()> {
        let mut cmd = self.s3_command();
        cmd.arg("cp")
            .arg(local)
            .arg(self.uri(key))
            .arg("--only-show-errors");
        self.runner.run(&mut cmd)?;
        debug!("uploaded");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    fn sync_dir(&self, local_dir: &Path, key_prefix: &str) -> BackupResult<()> {
        let mut source = local_dir.as_os_str().to_owned();
        source.push("/");

        let mut cmd = self.s3_command();
        cmd.arg("sync")
            .arg(source)
            .arg(format!("{}/", self.uri(key_prefix.trim_end_matches('/'))))
            .arg("--delete")
            .arg("--only-show-errors");
        self.runner.run(&mut cmd)?;
        debug!("synced");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    fn list(&self, prefix: &str) -> BackupResult<Vec<ObjectEntry>> {
        let mut cmd = self.s3_command();
        cmd.arg("ls").arg(self.uri(prefix)).arg("--recursive");

        let output = match self.runner.run(&mut cmd) {
            Ok(output) => output,
            // `aws s3 ls` exits 1 without output when nothing matches
            Err(ExecError::Failed { stderr, .. }) if stderr.is_empty() => {
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let entries: Vec<ObjectEntry> = output
            .stdout
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let entry = parse_ls_line(line);
                if entry.is_none() {
                    warn!(line, "unparseable listing line ignored");
                }
                entry
            })
            .filter(|entry| entry.key.starts_with(prefix))
            .collect();

        debug!(count = entries.len(), "listed objects");
        Ok(entries)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    fn delete(&self, key: &str) -> BackupResult<()> {
        let mut cmd = self.s3_command();
        cmd.arg("rm").arg(self.uri(key)).arg("--only-show-errors");
        self.runner.run(&mut cmd)?;
        Ok(())
    }

    fn uri(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    fn preflight(&self) -> BackupResult<()> {
        exec::probe("aws")
    }
}

/// Parse one line of `aws s3 ls --recursive`:
/// `2025-01-15 03:00:12     123456 git-backups/alpha/alpha_20250115_030000.tar.gz`
fn parse_ls_line(line: &str) -> Option<ObjectEntry> {
    let line = line.trim_start();
    let (date, rest) = line.split_once(char::is_whitespace)?;
    let rest = rest.trim_start();
    let (time, rest) = rest.split_once(char::is_whitespace)?;
    let rest = rest.trim_start();
    let (size, key) = rest.split_once(char::is_whitespace)?;
    let key = key.trim_start();

    if key.is_empty() {
        return None;
    }

    let last_modified =
        NaiveDateTime::parse_from_str(&format!("{} {}", date, time), "%Y-%m-%d %H:%M:%S").ok()?;
    let size = size.parse().ok()?;

    Some(ObjectEntry {
        key: key.to_string(),
        last_modified,
        size,
    })
}
