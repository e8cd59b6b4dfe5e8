//! Child-process execution for external tools (`tar`, `aws`)
//!
//! Commands are `tokio::process::Command`s. The blocking backup code drives
//! each one to completion with `block_on`, racing it against the optional
//! timeout and the shared cancellation token; whichever loses is dropped, and
//! `kill_on_drop` takes the child down with it.

use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::process::Command;
use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BackupError, TransferError};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured output of a successful command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Error, Debug)]
pub enum ExecError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("{program} timed out after {}s", .limit.as_secs())]
    TimedOut { program: String, limit: Duration },

    #[error("{program} cancelled")]
    Cancelled { program: String },
}

impl From<ExecError> for BackupError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Cancelled { .. } => Self::Cancelled,
            ExecError::TimedOut { limit, .. } => Self::TimedOut(limit.as_secs()),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<ExecError> for TransferError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Cancelled { .. } => Self::Cancelled,
            ExecError::TimedOut { limit, .. } => Self::TimedOut(limit.as_secs()),
            other => Self::Archive(other.to_string()),
        }
    }
}

/// Runs external commands under a timeout and a cancellation token
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl CommandRunner {
    pub fn new(timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        Self { timeout, cancel }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run `cmd` to completion, returning its output on a zero exit status
    ///
    /// Blocks the calling thread. Must not be called from async code; use a
    /// `spawn_blocking` thread instead.
    pub fn run(&self, cmd: &mut Command) -> Result<CommandOutput, ExecError> {
        let program = cmd.as_std().get_program().to_string_lossy().into_owned();

        if self.cancel.is_cancelled() {
            return Err(ExecError::Cancelled { program });
        }

        block_on(self.run_async(cmd, &program)).map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?
    }

    async fn run_async(&self, cmd: &mut Command, program: &str) -> Result<CommandOutput, ExecError> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(%program, args = ?cmd.as_std().get_args().collect::<Vec<_>>(), "spawning");

        let child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;
        let started = Instant::now();

        let finished = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                    .await
                    .map_err(|_| limit),
                None => Ok(child.wait_with_output().await),
            }
        };

        let output = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                warn!(%program, "cancelling running command");
                return Err(ExecError::Cancelled { program: program.to_string() });
            }
            finished = finished => match finished {
                Ok(output) => output,
                Err(limit) => {
                    warn!(%program, limit_secs = limit.as_secs(), "command timed out");
                    return Err(ExecError::TimedOut { program: program.to_string(), limit });
                }
            },
        };

        let output = output.map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(ExecError::Failed {
                program: program.to_string(),
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        debug!(%program, elapsed_ms = started.elapsed().as_millis() as u64, "command finished");
        Ok(CommandOutput { stdout, stderr })
    }
}

/// Drive `fut` on the ambient runtime, or on a private one outside of tokio
fn block_on<F: Future>(fut: F) -> std::io::Result<F::Output> {
    match Handle::try_current() {
        Ok(handle) => Ok(handle.block_on(fut)),
        Err(_) => Ok(Builder::new_current_thread().enable_all().build()?.block_on(fut)),
    }
}

/// Check that `program` can be executed (`program --version` succeeds)
pub fn probe(program: &str) -> Result<(), BackupError> {
    let runner = CommandRunner::new(Some(PROBE_TIMEOUT), CancellationToken::new());
    runner
        .run(Command::new(program).arg("--version"))
        .map(|_| ())
        .map_err(|e| BackupError::Dependency(format!("{} is not available ({})", program, e)))
}
