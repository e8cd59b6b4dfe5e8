//! Age-based retention
//!
//! Deletes archives whose modification *date* is strictly earlier than
//! `today - retention_days`. Comparison is by calendar day using real date
//! arithmetic, so an archive written on the cutoff day itself is kept.
//! Mirror destinations (`{prefix}/{repo}/latest/...`) are never swept.

use chrono::{Days, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::settings::MIRROR_DIR;
use crate::error::BackupResult;
use crate::storage::{dir_prefix, StorageClient};

/// A delete that failed during a sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepFailure {
    pub key: String,
    pub reason: String,
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// `None` when retention is disabled
    pub cutoff: Option<NaiveDate>,
    pub deleted: Vec<String>,
    pub retained: usize,
    /// Mirror objects left alone
    pub skipped: usize,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

/// Oldest date that is still retained
pub fn cutoff_date(today: NaiveDate, retention_days: i64) -> NaiveDate {
    let days = Days::new(retention_days.max(0) as u64);
    today.checked_sub_days(days).unwrap_or(NaiveDate::MIN)
}

/// Deletes expired artifacts from one bucket
pub struct RetentionSweeper<'a> {
    storage: &'a dyn StorageClient,
}

impl<'a> RetentionSweeper<'a> {
    pub fn new(storage: &'a dyn StorageClient) -> Self {
        Self { storage }
    }

    /// Sweep `prefix` relative to the local current date
    pub fn sweep(&self, prefix: &str, retention_days: i64) -> BackupResult<SweepReport> {
        self.sweep_at(prefix, retention_days, Local::now().date_naive())
    }

    /// Sweep `prefix` as if today were `today`
    ///
    /// Only the listing can fail the sweep as a whole; a failed delete is
    /// recorded and the remaining objects are still processed.
    #[instrument(skip(self))]
    pub fn sweep_at(
        &self,
        prefix: &str,
        retention_days: i64,
        today: NaiveDate,
    ) -> BackupResult<SweepReport> {
        if retention_days <= 0 {
            debug!("retention disabled");
            return Ok(SweepReport::default());
        }

        let cutoff = cutoff_date(today, retention_days);
        let listing_prefix = dir_prefix(prefix);
        let entries = self.storage.list(&listing_prefix)?;

        let mut report = SweepReport {
            cutoff: Some(cutoff),
            ..Default::default()
        };

        for entry in entries {
            if is_mirror_key(&listing_prefix, &entry.key) {
                report.skipped += 1;
                continue;
            }

            if entry.last_modified.date() >= cutoff {
                report.retained += 1;
                continue;
            }

            match self.storage.delete(&entry.key) {
                Ok(()) => {
                    debug!(key = %entry.key, modified = %entry.last_modified, "expired artifact deleted");
                    report.deleted.push(entry.key);
                }
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "failed to delete expired artifact");
                    report.failures.push(SweepFailure {
                        key: entry.key,
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            %cutoff,
            deleted = report.deleted.len(),
            retained = report.retained,
            failed = report.failures.len(),
            "retention sweep finished"
        );
        Ok(report)
    }
}

/// `{prefix}/{repo}/latest/...`
fn is_mirror_key(listing_prefix: &str, key: &str) -> bool {
    let relative = key.strip_prefix(listing_prefix).unwrap_or(key);
    let mut segments = relative.split('/');
    let _repository = segments.next();
    segments.next() == Some(MIRROR_DIR) && segments.next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::testing::MemoryStorage;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_cutoff_uses_date_arithmetic() {
        assert_eq!(cutoff_date(date(2025, 3, 1), 1), date(2025, 2, 28));
        assert_eq!(cutoff_date(date(2024, 3, 1), 1), date(2024, 2, 29));
        assert_eq!(cutoff_date(date(2025, 1, 5), 30), date(2024, 12, 6));
        assert_eq!(cutoff_date(date(2025, 1, 5), 0), date(2025, 1, 5));
    }

    #[test]
    fn test_sweep_deletes_strictly_older_than_cutoff() {
        let storage = MemoryStorage::new();
        storage.insert("git-backups/alpha/alpha_old.tar.gz", date(2025, 1, 30));
        storage.insert("git-backups/alpha/alpha_boundary.tar.gz", date(2025, 1, 31));
        storage.insert("git-backups/alpha/alpha_new.tar.gz", date(2025, 3, 1));
        storage.insert("git-backups/beta/beta_ancient.tar.gz", date(2023, 6, 1));

        let sweeper = RetentionSweeper::new(&storage);
        let report = sweeper.sweep_at("git-backups", 29, date(2025, 3, 1)).unwrap();

        assert_eq!(report.cutoff, Some(date(2025, 1, 31)));
        assert_eq!(report.deleted_count(), 2);
        assert_eq!(report.retained, 2);
        assert_eq!(
            storage.keys(),
            vec![
                "git-backups/alpha/alpha_boundary.tar.gz".to_string(),
                "git-backups/alpha/alpha_new.tar.gz".to_string(),
            ]
        );
    }

    #[test]
    fn test_zero_retention_deletes_nothing() {
        let storage = MemoryStorage::new();
        storage.insert("git-backups/alpha/alpha_old.tar.gz", date(2000, 1, 1));

        let sweeper = RetentionSweeper::new(&storage);
        let report = sweeper.sweep_at("git-backups", 0, date(2025, 3, 1)).unwrap();
        assert_eq!(report, SweepReport::default());

        let report = sweeper.sweep_at("git-backups", -5, date(2025, 3, 1)).unwrap();
        assert_eq!(report.deleted_count(), 0);
        assert_eq!(storage.keys().len(), 1);
        assert_eq!(storage.list_calls(), 0);
    }

    #[test]
    fn test_delete_failure_does_not_stop_sweep() {
        let storage = MemoryStorage::new().fail_deletes_matching("alpha");
        storage.insert("git-backups/alpha/alpha_old.tar.gz", date(2024, 1, 1));
        storage.insert("git-backups/beta/beta_old.tar.gz", date(2024, 1, 1));

        let sweeper = RetentionSweeper::new(&storage);
        let report = sweeper.sweep_at("git-backups", 7, date(2025, 3, 1)).unwrap();

        assert_eq!(report.deleted, vec!["git-backups/beta/beta_old.tar.gz".to_string()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].key, "git-backups/alpha/alpha_old.tar.gz");
    }

    #[test]
    fn test_mirror_objects_are_skipped() {
        let storage = MemoryStorage::new();
        storage.insert("git-backups/alpha/latest/objects/pack/p.pack", date(2020, 1, 1));
        storage.insert("git-backups/latest/latest_old.tar.gz", date(2020, 1, 1));

        let sweeper = RetentionSweeper::new(&storage);
        let report = sweeper.sweep_at("git-backups", 7, date(2025, 3, 1)).unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.deleted, vec!["git-backups/latest/latest_old.tar.gz".to_string()]);
    }

    #[test]
    fn test_prefix_matches_whole_segment() {
        let storage = MemoryStorage::new();
        storage.insert("git-backups-other/alpha/alpha_old.tar.gz", date(2020, 1, 1));

        let sweeper = RetentionSweeper::new(&storage);
        let report = sweeper.sweep_at("git-backups", 7, date(2025, 3, 1)).unwrap();
        assert_eq!(report.deleted_count(), 0);
        assert_eq!(storage.keys().len(), 1);
    }
}
