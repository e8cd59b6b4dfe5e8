//! Command handlers
//!
//! Each handler runs one operation and prints its report to stdout, either
//! as a plain-text table or, with `--json`, as JSON.

use serde::Serialize;

use crate::backup::{Orchestrator, RunHistory, RunResult};
use crate::config::BackupConfig;
use crate::display;
use crate::error::BackupResult;

fn print_json<T: Serialize + ?Sized>(value: &T) -> BackupResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `list`: print the candidate repositories
pub fn handle_list(orchestrator: &Orchestrator, json: bool) -> BackupResult<()> {
    let repositories = orchestrator.list()?;

    if json {
        print_json(&repositories)
    } else {
        println!("{}", display::format_repository_list(&repositories));
        Ok(())
    }
}

/// `dry-run`: validate and describe the run that `execute` would perform
pub fn handle_dry_run(orchestrator: &Orchestrator, json: bool) -> BackupResult<()> {
    let report = orchestrator.dry_run()?;

    if json {
        print_json(&report)
    } else {
        println!("{}", display::format_dry_run(&report));
        Ok(())
    }
}

/// `history`: print the most recent runs
pub fn handle_history(config: &BackupConfig, limit: usize, json: bool) -> BackupResult<()> {
    let runs = RunHistory::new(config.history_path.clone()).read_recent(limit)?;

    if json {
        print_json(&runs)
    } else {
        println!("{}", display::format_history(&runs));
        Ok(())
    }
}

/// Print the outcome of an `execute` run
pub fn print_run_result(result: &RunResult, json: bool) -> BackupResult<()> {
    if json {
        print_json(result)
    } else {
        println!("{}", display::format_run_summary(result));
        Ok(())
    }
}
