use std::time::Duration;

use async_trait::async_trait;

/// Captured output of one shell invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellOutput {
    pub stdout: String,
    /// Non-empty when the invocation itself failed (spawn error, timeout).
    pub stderr: String,
    /// Exit code, absent when the process was killed or never started.
    pub exit_code: Option<i32>,
}

impl ShellOutput {
    /// Output of an invocation that could not complete.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: reason.into(),
            exit_code: None,
        }
    }

    /// Whether the batch should be treated as failed.
    pub fn is_failure(&self) -> bool {
        !self.stderr.trim().is_empty()
    }
}

/// Port for running one command string through the platform shell.
///
/// Implementations never fail: spawn errors and timeouts are reported through
/// `stderr` with an empty `stdout`.
#[async_trait]
pub trait ShellExecutor: Send + Sync {
    async fn exec(&self, command: &str, timeout: Duration) -> ShellOutput;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_output() {
        let out = ShellOutput::failed("Timeout");
        assert!(out.is_failure());
        assert!(out.stdout.is_empty());
        assert_eq!(out.exit_code, None);

        assert!(!ShellOutput::default().is_failure());
    }
}
