use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::ports::{ShellExecutor, ShellOutput};

/// Runs commands through the platform shell (`cmd /C` on Windows, `sh -c` elsewhere).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShell;

impl SystemShell {
    pub fn new() -> Self {
        Self
    }

    #[cfg(windows)]
    fn shell_command(command: &str) -> Command {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    }

    #[cfg(not(windows))]
    fn shell_command(command: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

#[async_trait]
impl ShellExecutor for SystemShell {
    async fn exec(&self, command: &str, timeout: Duration) -> ShellOutput {
        let mut cmd = Self::shell_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout kills the shell.
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "Failed to spawn shell");
                return ShellOutput::failed(format!("Failed to spawn shell: {}", e));
            }
        };

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let result = ShellOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code: output.status.code(),
                };
                debug!(
                    exit_code = ?result.exit_code,
                    stdout_len = result.stdout.len(),
                    stderr_len = result.stderr.len(),
                    "Shell command finished"
                );
                result
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to collect shell output");
                ShellOutput::failed(format!("Failed to collect output: {}", e))
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Shell command timed out");
                ShellOutput::failed("Timeout")
            }
        }
    }
}
