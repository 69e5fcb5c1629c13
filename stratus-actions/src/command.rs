//! External process execution
//!
//! Thin wrapper over `tokio::process` used by every production action.
//! Child processes are killed when the awaiting future is dropped, so a step
//! timeout or a cancelled saga never leaves terraform or ssh running.

use std::path::Path;
use std::process::Stdio;

use stratus_core::error::ActionError;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the process was terminated by a signal
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last non-empty line of stderr, falling back to stdout
    pub fn summary(&self) -> &str {
        self.stderr
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .or_else(|| self.stdout.lines().rev().find(|line| !line.trim().is_empty()))
            .map(str::trim)
            .unwrap_or("no output")
    }
}

/// Runs `program` with `args` and captures its output
///
/// A process that cannot be spawned is reported as a transient failure; the
/// exit code is returned as-is for the caller to interpret.
pub async fn run<S: AsRef<str>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
) -> Result<CommandOutput, ActionError> {
    let mut command = Command::new(program);
    command
        .args(args.iter().map(AsRef::as_ref))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = cwd {
        command.current_dir(dir);
    }

    debug!(
        "Executing: {} {}",
        program,
        args.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ")
    );

    let output = command
        .output()
        .await
        .map_err(|e| ActionError::transient(format!("failed to execute '{}': {}", program, e)))?;

    let result = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    };

    debug!("{} exit code: {}", program, result.exit_code);
    if !result.stdout.is_empty() {
        debug!("{} stdout: {}", program, result.stdout.trim_end());
    }
    if !result.stderr.is_empty() {
        debug!("{} stderr: {}", program, result.stderr.trim_end());
    }

    Ok(result)
}

/// Like [`run`], but a non-zero exit is a transient failure
pub async fn run_checked<S: AsRef<str>>(
    program: &str,
    args: &[S],
    cwd: Option<&Path>,
) -> Result<CommandOutput, ActionError> {
    let output = run(program, args, cwd).await?;

    if output.success() {
        Ok(output)
    } else {
        Err(ActionError::transient(format!(
            "'{}' exited with code {}: {}",
            program,
            output.exit_code,
            output.summary()
        )))
    }
}

/// Runs a user-supplied command line through `sh -c`
pub async fn run_shell(script: &str, cwd: Option<&Path>) -> Result<CommandOutput, ActionError> {
    run("sh", &["-c", script], cwd).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_exit_code_and_output() {
        let output = run_shell("echo building; echo oops >&2; exit 3", None)
            .await
            .unwrap();

        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "building");
        assert_eq!(output.summary(), "oops");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_missing_program_is_transient() {
        let err = run("stratus-no-such-binary", &["--version"], None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_run_checked_rejects_non_zero_exit() {
        let err = run_checked("sh", &["-c", "exit 1"], None).await.unwrap_err();
        assert!(err.message.contains("exited with code 1"));
    }
}
