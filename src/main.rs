use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use gitbackup::backup::Orchestrator;
use gitbackup::cli::{handle_dry_run, handle_history, handle_list, print_run_result, ConfigArgs};
use gitbackup::config::BackupPaths;
use gitbackup::BackupError;

#[derive(Parser)]
#[command(
    name = "git-s3-backup",
    version,
    about = "Back up bare git repositories to S3-compatible object storage",
    long_about = "Finds every bare git repository under a root directory and copies \
                  each one to an S3-compatible bucket, as a timestamped tar.gz archive \
                  or as a mirrored tree. Archives older than the retention period are \
                  deleted after each run. Runs without a subcommand perform `execute`.",
    args_override_self = true
)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up every repository, then sweep expired archives
    Execute,

    /// Validate configuration and dependencies without transferring anything
    DryRun,

    /// List the repositories that would be backed up
    #[command(alias = "ls")]
    List,

    /// Show recent runs
    History {
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => warn!("received SIGINT, cancelling run"),
        () = terminate => warn!("received SIGTERM, cancelling run"),
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let paths = BackupPaths::new()?;
    let config = cli
        .config
        .resolve(&paths)
        .context("Failed to load configuration")?;

    gitbackup::logging::init(config.log_level, cli.config.log_json);
    let json = cli.config.json;

    // Orchestrator calls block on child processes, so they stay off the runtime workers
    match cli.command.unwrap_or(Commands::Execute) {
        Commands::List => {
            let orchestrator = Orchestrator::from_config(config, CancellationToken::new());
            tokio::task::spawn_blocking(move || handle_list(&orchestrator, json))
                .await
                .context("Listing aborted")??;
            Ok(0)
        }
        Commands::DryRun => {
            let orchestrator = Orchestrator::from_config(config, CancellationToken::new());
            tokio::task::spawn_blocking(move || handle_dry_run(&orchestrator, json))
                .await
                .context("Dry run aborted")??;
            Ok(0)
        }
        Commands::History { limit } => {
            handle_history(&config, limit, json)?;
            Ok(0)
        }
        Commands::Execute => {
            let cancel = CancellationToken::new();
            let orchestrator = Orchestrator::from_config(config, cancel.clone());
            let mut task = tokio::task::spawn_blocking(move || orchestrator.execute());

            let joined = tokio::select! {
                joined = &mut task => joined,
                () = shutdown_signal() => {
                    cancel.cancel();
                    task.await
                }
            };

            let result = joined.context("Backup run aborted")??;
            print_run_result(&result, json)?;
            Ok(result.exit_code())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<BackupError>()
                .map_or(2, BackupError::exit_code);
            ExitCode::from(code)
        }
    }
}
