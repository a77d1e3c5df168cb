//! Subprocess invocation with a hard wall-clock deadline.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;

/// Captured result of one external command.
#[derive(Debug)]
pub struct CommandOutput {
    /// Whether the process exited with status zero.
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Run `program args...` and capture its output, failing if the deadline
/// passes first. A non-zero exit is not an error; spawn failures and
/// timeouts are.
pub async fn run_command(
    program: &str,
    args: &[&str],
    deadline: Duration,
) -> Result<CommandOutput> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdin(std::process::Stdio::null());
    cmd.kill_on_drop(true);

    let output = tokio::time::timeout(deadline, cmd.output())
        .await
        .with_context(|| format!("{program} timed out after {deadline:?}"))?
        .with_context(|| format!("failed to spawn {program}"))?;

    Ok(CommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let out = run_command("echo", &["hello"], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_an_error() {
        let out = run_command("sh", &["-c", "exit 3"], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!out.success);
    }

    #[tokio::test]
    async fn deadline_kills_slow_commands() {
        let err = run_command("sleep", &["5"], Duration::from_millis(50)).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let err = run_command("definitely-not-a-binary", &[], Duration::from_secs(1)).await;
        assert!(err.is_err());
    }
}
