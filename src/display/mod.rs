//! Terminal output formatting
//!
//! Plain-text tables and summaries for the CLI. Everything here returns a
//! `String`; printing is left to the command handlers.

use crate::backup::{DryRunReport, RepositoryRef, RunResult};

/// Format the candidate repositories as a table
pub fn format_repository_list(repositories: &[RepositoryRef]) -> String {
    if repositories.is_empty() {
        return "No repositories found.".to_string();
    }

    let name_width = repositories
        .iter()
        .map(|r| r.name.len())
        .max()
        .unwrap_or(4)
        .max(4);

    let mut output = String::new();
    output.push_str(&format!(
        "{:<name_width$}  {:<8}  {}\n",
        "Name",
        "Kind",
        "Path",
        name_width = name_width,
    ));
    output.push_str(&format!(
        "{:-<name_width$}  {:-<8}  {:-<4}\n",
        "",
        "",
        "",
        name_width = name_width,
    ));

    for repository in repositories {
        output.push_str(&format!(
            "{:<name_width$}  {:<8}  {}\n",
            repository.name,
            repository.kind.to_string(),
            repository.path.display(),
            name_width = name_width,
        ));
    }

    output.push_str(&format!("\nTotal: {} repository(ies)", repositories.len()));
    output
}

/// Format a dry-run validation report
pub fn format_dry_run(report: &DryRunReport) -> String {
    let retention = if report.retention_days > 0 {
        format!("{} days", report.retention_days)
    } else {
        "disabled".to_string()
    };

    let mut output = String::new();
    output.push_str("Dry run: configuration OK\n");
    output.push_str("=========================\n");
    output.push_str(&format!("Repository root: {}\n", report.repo_root));
    output.push_str(&format!("Repositories:    {}\n", report.repositories));
    output.push_str(&format!("Mode:            {}\n", report.mode));
    output.push_str(&format!("Destination:     {}\n", report.destination));
    output.push_str(&format!("Retention:       {}\n", retention));
    output.push_str(&format!("Lock file:       {}\n", report.lock_path));
    output.push_str("\nNo lock taken, nothing transferred.");
    output
}

/// Format the end-of-run summary
pub fn format_run_summary(result: &RunResult) -> String {
    let status = if result.cancelled {
        "CANCELLED"
    } else if result.is_success() {
        "OK"
    } else {
        "COMPLETED WITH FAILURES"
    };

    let mut output = String::new();
    output.push_str(&format!("Backup run {}: {}\n", result.run_id, status));
    output.push_str(&format!(
        "  Succeeded: {}  Failed: {}  Swept: {}  Elapsed: {}\n",
        result.succeeded,
        result.failed,
        result.swept,
        format_elapsed(result.elapsed_ms),
    ));

    if !result.failures.is_empty() {
        output.push_str("\nFailed repositories:\n");
        for failure in &result.failures {
            output.push_str(&format!("  - {}: {}\n", failure.repository, failure.reason));
        }
    }

    if !result.sweep_failures.is_empty() {
        output.push_str("\nRetention sweep failures:\n");
        for failure in &result.sweep_failures {
            output.push_str(&format!("  - {}\n", failure));
        }
    }

    output.trim_end().to_string()
}

/// Format past runs, one line each
pub fn format_history(runs: &[RunResult]) -> String {
    if runs.is_empty() {
        return "No runs recorded.".to_string();
    }

    let mut output = String::new();
    output.push_str(&format!(
        "{:<19}  {:<7}  {:>9}  {:>6}  {:>5}  {:>8}  {}\n",
        "Started (UTC)", "Mode", "Succeeded", "Failed", "Swept", "Elapsed", "Status",
    ));
    output.push_str(&format!(
        "{:-<19}  {:-<7}  {:->9}  {:->6}  {:->5}  {:->8}  {:-<6}\n",
        "", "", "", "", "", "", "",
    ));

    for run in runs {
        let status = if run.cancelled {
            "cancelled"
        } else if run.is_success() {
            "ok"
        } else {
            "failures"
        };
        output.push_str(&format!(
            "{:<19}  {:<7}  {:>9}  {:>6}  {:>5}  {:>8}  {}\n",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.mode.to_string(),
            run.succeeded,
            run.failed,
            run.swept,
            format_elapsed(run.elapsed_ms),
            status,
        ));
    }

    output.trim_end().to_string()
}

/// Format a duration in milliseconds in human-readable form
pub fn format_elapsed(ms: u64) -> String {
    if ms < 1000 {
        return format!("{}ms", ms);
    }

    let seconds = ms / 1000;
    if seconds < 60 {
        return format!("{:.1}s", ms as f64 / 1000.0);
    }

    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{}m{:02}s", minutes, seconds % 60);
    }

    format!("{}h{:02}m", minutes / 60, minutes % 60)
}
