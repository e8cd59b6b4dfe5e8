//! Run history log
//!
//! Every `execute` run appends its `RunResult` to a line-delimited JSON file
//! (one object per line), which `history` reads back.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use super::orchestrator::RunResult;
use crate::error::{BackupError, BackupResult};

/// Append-only log of completed runs
pub struct RunHistory {
    path: PathBuf,
}

impl RunHistory {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one run, flushing immediately
    pub fn append(&self, result: &RunResult) -> BackupResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BackupError::Io(format!("Failed to create history directory: {}", e))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| BackupError::Io(format!("Failed to open run history: {}", e)))?;

        let json = serde_json::to_string(result)?;
        writeln!(file, "{}", json)
            .map_err(|e| BackupError::Io(format!("Failed to write run history: {}", e)))?;
        file.flush()?;

        Ok(())
    }

    /// All recorded runs, oldest first
    pub fn read_all(&self) -> BackupResult<Vec<RunResult>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .map_err(|e| BackupError::Io(format!("Failed to open run history: {}", e)))?;

        let mut runs = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let run = serde_json::from_str(&line).map_err(|e| {
                BackupError::Json(format!(
                    "Failed to parse run history line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;
            runs.push(run);
        }

        Ok(runs)
    }

    /// The most recent `count` runs, oldest first
    pub fn read_recent(&self, count: usize) -> BackupResult<Vec<RunResult>> {
        let mut runs = self.read_all()?;
        let start = runs.len().saturating_sub(count);
        Ok(runs.split_off(start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferMode;
    use tempfile::TempDir;

    fn result(succeeded: usize) -> RunResult {
        let mut result = RunResult::new(TransferMode::Archive);
        result.succeeded = succeeded;
        result
    }

    #[test]
    fn test_append_and_read() {
        let temp = TempDir::new().unwrap();
        let history = RunHistory::new(temp.path().join("state/history.jsonl"));

        assert!(history.read_all().unwrap().is_empty());

        for i in 0..5 {
            history.append(&result(i)).unwrap();
        }

        let all = history.read_all().unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].succeeded, 0);

        let recent = history.read_recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].succeeded, 3);
        assert_eq!(recent[1].succeeded, 4);
    }

    #[test]
    fn test_corrupt_line_is_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("history.jsonl");
        fs::write(&path, "{not json}\n").unwrap();

        let err = RunHistory::new(path).read_all().unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
