use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command;
use tracing::{debug, warn};

/// Captured result of one external tool invocation.
#[derive(Debug)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn exited_with(&self, codes: &[i32]) -> bool {
        self.exit_code.map(|c| codes.contains(&c)).unwrap_or(false)
    }
}

/// Outcome of running a tool under a deadline.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(ToolOutput),
    TimedOut,
}

/// Spawn an external analyzer and wait for it under a deadline. The child is
/// killed when the deadline passes or the future is dropped.
pub async fn run_tool(
    program: &Path,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<RunOutcome> {
    debug!(program = %program.display(), ?args, cwd = %cwd.display(), "running external tool");

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(result) => result.with_context(|| {
            format!("failed to spawn external tool {}", program.display())
        })?,
        Err(_) => {
            warn!(
                program = %program.display(),
                timeout_secs = timeout.as_secs(),
                "external tool exceeded its deadline"
            );
            return Ok(RunOutcome::TimedOut);
        }
    };

    Ok(RunOutcome::Completed(ToolOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    }))
}

/// Locate an executable on `PATH`, the way the analyzers themselves are
/// found by a shell.
pub fn binary_on_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let sh = binary_on_path("sh").expect("sh available in test environment");
        let outcome = run_tool(
            &sh,
            &["-c", "echo hello"],
            Path::new("."),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        match outcome {
            RunOutcome::Completed(output) => {
                assert_eq!(output.exit_code, Some(0));
                assert_eq!(output.stdout.trim(), "hello");
            }
            RunOutcome::TimedOut => panic!("echo should not time out"),
        }
    }

    #[tokio::test]
    async fn deadline_yields_timed_out() {
        let sh = binary_on_path("sh").expect("sh available in test environment");
        let outcome = run_tool(
            &sh,
            &["-c", "sleep 5"],
            Path::new("."),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, RunOutcome::TimedOut));
    }

    #[tokio::test]
    async fn missing_binary_is_an_error_not_a_panic() {
        let result = run_tool(
            Path::new("definitely-not-a-real-binary"),
            &[],
            Path::new("."),
            Duration::from_secs(1),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn path_probe_finds_common_binaries() {
        assert!(binary_on_path("sh").is_some());
        assert!(binary_on_path("no-such-binary-here").is_none());
    }
}
