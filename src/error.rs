// Error taxonomy shared by the site, certificate, health and scheduling layers.

use crate::executor::CommandOutput;

pub type Result<T> = std::result::Result<T, PanelError>;

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    /// Malformed input, rejected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Non-zero exit, spawn failure or timeout of an external tool.
    #[error("command `{command}` {}: {stderr}", failure_summary(.exit_code, .timed_out))]
    ExternalCommand {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
        timed_out: bool,
    },

    /// Some steps of a multi-step job failed while others succeeded.
    #[error("partial failure: {} of {} steps failed ({})", .failed.len(), .failed.len() + .succeeded.len(), .failed.join(", "))]
    PartialFailure {
        failed: Vec<String>,
        succeeded: Vec<String>,
    },

    #[error("{0} exceeded its time budget")]
    Timeout(String),

    #[error("{task} panicked: {message}")]
    Panicked { task: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

fn failure_summary(exit_code: &Option<i32>, timed_out: &bool) -> String {
    match (timed_out, exit_code) {
        (true, _) => "timed out".into(),
        (false, Some(code)) => format!("exited with status {}", code),
        (false, None) => "failed to run".into(),
    }
}

impl PanelError {
    /// Builds an `ExternalCommand` error from a failed command result.
    pub fn from_output(output: &CommandOutput) -> Self {
        let stderr = if output.stderr.trim().is_empty() {
            output.spawn_error.clone().unwrap_or_default()
        } else {
            output.stderr.trim().to_string()
        };
        PanelError::ExternalCommand {
            command: output.command.clone(),
            exit_code: output.exit_code,
            stderr,
            timed_out: output.timed_out,
        }
    }

    /// Stable tag used by the transport layer to pick a status code.
    pub fn kind(&self) -> &'static str {
        match self {
            PanelError::Validation(_) => "validation_error",
            PanelError::Conflict(_) => "conflict_error",
            PanelError::NotFound(_) => "not_found",
            PanelError::ExternalCommand { .. } => "external_command_error",
            PanelError::PartialFailure { .. } => "partial_failure",
            PanelError::Timeout(_) => "timeout",
            PanelError::Panicked { .. } => "panic",
            PanelError::Io(_) => "io_error",
            PanelError::Store(_) => "store_error",
        }
    }
}
