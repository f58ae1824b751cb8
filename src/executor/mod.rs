// External command execution with timeout; never returns an error, only a structured result.

mod template;

pub use template::CommandTemplate;

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::instrument;

use crate::error::{PanelError, Result};

/// A fully rendered command: program, arguments and optional stdin/stdout redirection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's stdin, then stdin is closed.
    pub stdin: Option<String>,
    /// Child stdout goes to this file instead of being captured.
    pub stdout_path: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            stdin: None,
            stdout_path: None,
        }
    }

    pub fn with_stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn with_stdout_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_path = Some(path.into());
        self
    }

    /// Human-readable command line for logs and error messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed, timed out or never started.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub spawn_error: Option<String>,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.spawn_error.is_none() && self.exit_code == Some(0)
    }

    /// Converts a failed result into `PanelError::ExternalCommand`.
    pub fn into_result(self) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(PanelError::from_output(&self))
        }
    }

    fn not_started(command: String, error: String) -> Self {
        Self {
            command,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            timed_out: false,
            spawn_error: Some(error),
            elapsed: Duration::ZERO,
        }
    }
}

/// Spawns one process per call. No retries; callers decide retry policy.
#[derive(Debug, Clone, Default)]
pub struct CommandExecutor;

impl CommandExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Runs `spec`, killing the child if it outlives `timeout`. `None` means no deadline.
    #[instrument(skip(self, spec), fields(command = %spec.display(), timeout_ms = timeout.map(|t| t.as_millis() as u64)))]
    pub async fn run(&self, spec: &CommandSpec, timeout: Option<Duration>) -> CommandOutput {
        let label = spec.display();
        let started = Instant::now();

        let stdout = match &spec.stdout_path {
            Some(path) => match tokio::fs::File::create(path).await {
                Ok(file) => Stdio::from(file.into_std().await),
                Err(e) => {
                    return CommandOutput::not_started(
                        label,
                        format!("cannot open {}: {}", path.display(), e),
                    );
                }
            },
            None => Stdio::piped(),
        };

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "command failed to start");
                return CommandOutput::not_started(label, e.to_string());
            }
        };

        if let (Some(input), Some(mut stdin)) = (spec.stdin.clone(), child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    tracing::debug!(error = %e, "command stdin closed early");
                }
            });
        }

        let wait = child.wait_with_output();
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.ok(),
            None => Some(wait.await),
        };
        let elapsed = started.elapsed();

        match result {
            // Dropping the wait future drops the child, and kill_on_drop kills it.
            None => {
                tracing::warn!(elapsed_ms = elapsed.as_millis() as u64, "command timed out");
                CommandOutput {
                    command: label,
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: None,
                    timed_out: true,
                    spawn_error: None,
                    elapsed,
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "command wait failed");
                CommandOutput {
                    elapsed,
                    ..CommandOutput::not_started(label, e.to_string())
                }
            }
            Some(Ok(output)) => {
                let out = CommandOutput {
                    command: label,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code: output.status.code(),
                    timed_out: false,
                    spawn_error: None,
                    elapsed,
                };
                if out.success() {
                    tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "command ok");
                } else {
                    tracing::debug!(
                        exit_code = ?out.exit_code,
                        stderr = %out.stderr.trim(),
                        "command failed"
                    );
                }
                out
            }
        }
    }
}
