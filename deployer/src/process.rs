//! Local subprocess execution with timeout and cancellation

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::DeployError;

/// Exit code and combined stdout/stderr of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The output on success, `CommandFailed` otherwise
    pub fn into_result(self, label: &str) -> Result<String, DeployError> {
        if self.success() {
            Ok(self.output)
        } else {
            Err(DeployError::CommandFailed {
                command: label.to_string(),
                code: self.code,
                output: self.output.trim().to_string(),
            })
        }
    }
}

/// Run `command` to completion, killing it on timeout or cancellation.
///
/// `label` names the command in logs and errors; it must not carry secrets.
pub async fn run_command(
    mut command: Command,
    label: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<CommandOutput, DeployError> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running: {}", label);
    let child = command
        .spawn()
        .map_err(|e| DeployError::ConfigError(format!("Failed to start `{}`: {}", label, e)))?;

    let output = tokio::select! {
        _ = cancel.cancelled() => {
            return Err(DeployError::Cancelled(label.to_string()));
        }
        result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
            Ok(output) => output?,
            Err(_) => {
                return Err(DeployError::Timeout(format!("`{}` after {:?}", label, timeout)));
            }
        }
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok(CommandOutput {
        code: output.status.code(),
        output: combined,
    })
}
