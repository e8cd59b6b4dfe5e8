//! CLI argument model and command handlers
//!
//! Bridges clap argument parsing with the backup library.

pub mod args;
pub mod commands;

pub use args::ConfigArgs;
pub use commands::{handle_dry_run, handle_history, handle_list, print_run_result};
