use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures of the plan, run and persist pipeline
///
/// None of these are retried. `summary` gives the short diagnostic title and
/// `Display` the detailed message shown beneath it.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to resolve source directory {path:?}: {reason}")]
    PathResolution { path: PathBuf, reason: String },

    #[error("Source directory does not exist: {}", path.display())]
    DirectoryNotFound { path: PathBuf },

    #[error("Source path is not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },

    #[error(
        "Command: {}\nError: timed out after {} seconds\nOutput: {output}",
        command_line(command, args),
        timeout.as_secs()
    )]
    Timeout {
        command: String,
        args: Vec<String>,
        timeout: Duration,
        output: String,
    },

    #[error(
        "Command: {}\nError: {reason}\nOutput: {output}",
        command_line(command, args)
    )]
    ExecutionFailed {
        command: String,
        args: Vec<String>,
        reason: String,
        output: String,
    },

    #[error("Command: {}\nError: cancelled\nOutput: {output}", command_line(command, args))]
    Cancelled {
        command: String,
        args: Vec<String>,
        output: String,
    },

    #[error("Changes to kcl_exec require the resource to be replaced")]
    UnsupportedOperation,
}

impl ExecError {
    pub fn summary(&self) -> &'static str {
        match self {
            ExecError::PathResolution { .. } => "Path Resolution Failed",
            ExecError::DirectoryNotFound { .. } => "Source Directory Not Found",
            ExecError::NotADirectory { .. } => "Source Path Not A Directory",
            ExecError::Timeout { .. } | ExecError::ExecutionFailed { .. } => {
                "KCL Execution Failed"
            }
            ExecError::Cancelled { .. } => "KCL Execution Cancelled",
            ExecError::UnsupportedOperation => "Update Not Supported",
        }
    }

    /// Output captured before the failure, if a process ran
    pub fn output(&self) -> Option<&str> {
        match self {
            ExecError::Timeout { output, .. }
            | ExecError::ExecutionFailed { output, .. }
            | ExecError::Cancelled { output, .. } => Some(output),
            _ => None,
        }
    }
}

fn command_line(command: &str, args: &[String]) -> String {
    if args.is_empty() {
        command.to_string()
    } else {
        format!("{} {}", command, args.join(" "))
    }
}
