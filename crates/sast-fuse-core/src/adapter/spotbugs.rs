use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tempfile::TempDir;
use tracing::warn;

use super::process::{binary_on_path, run_tool, RunOutcome};
use super::{RawOutput, ToolAdapter};
use crate::detect;
use crate::model::{Language, ToolKind};

/// Runs SpotBugs over Java bytecode. Sources are compiled into a scoped work
/// directory first; both the class files and the SARIF report live there and
/// vanish with the `TempDir`, whatever the exit path.
pub struct SpotbugsAdapter {
    timeout: Duration,
    /// Explicit installation root, e.g. from a `SPOTBUGS_HOME`-aware caller.
    home: Option<PathBuf>,
}

impl SpotbugsAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            home: None,
        }
    }

    pub fn with_home(timeout: Duration, home: Option<PathBuf>) -> Self {
        Self { timeout, home }
    }

    fn spotbugs_binary(&self) -> Option<PathBuf> {
        if let Some(home) = &self.home {
            let candidate = home.join("bin").join("spotbugs");
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        binary_on_path("spotbugs")
    }

    async fn compile_sources(&self, tree: &Path, classes_dir: &Path) -> Result<bool> {
        let Some(javac) = binary_on_path("javac") else {
            warn!(tool = "spotbugs", "javac not found on PATH, cannot compile sources");
            return Ok(false);
        };

        let java_files = detect::files_by_language(tree, Language::Java)?;
        if java_files.is_empty() {
            warn!(tool = "spotbugs", "no java sources to compile");
            return Ok(false);
        }

        let classes_arg = classes_dir.to_string_lossy().into_owned();
        let tree_arg = tree.to_string_lossy().into_owned();
        let mut args: Vec<String> =
            vec!["-d".into(), classes_arg, "-sourcepath".into(), tree_arg];
        args.extend(
            java_files
                .iter()
                .map(|f| f.to_string_lossy().into_owned()),
        );
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let outcome = run_tool(&javac, &arg_refs, tree, self.timeout).await?;
        match outcome {
            RunOutcome::Completed(output) if output.exited_with(&[0]) => Ok(true),
            RunOutcome::Completed(output) => {
                warn!(
                    tool = "spotbugs",
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "java compilation failed, skipping"
                );
                Ok(false)
            }
            RunOutcome::TimedOut => {
                warn!(tool = "spotbugs", "java compilation timed out, skipping");
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl ToolAdapter for SpotbugsAdapter {
    fn tool(&self) -> ToolKind {
        ToolKind::SpotBugs
    }

    fn supports(&self, language: Language) -> bool {
        language == Language::Java
    }

    async fn probe(&self) -> bool {
        self.spotbugs_binary().is_some()
    }

    async fn run(&self, tree: &Path, _language: Language) -> Result<Option<RawOutput>> {
        let Some(binary) = self.spotbugs_binary() else {
            warn!(tool = "spotbugs", "binary not found on PATH or in home, skipping");
            return Ok(None);
        };

        let work_dir = TempDir::new().context("failed to create spotbugs work directory")?;
        let classes_dir = work_dir.path().join("classes");
        std::fs::create_dir_all(&classes_dir)
            .context("failed to create spotbugs classes directory")?;

        if !self.compile_sources(tree, &classes_dir).await? {
            return Ok(None);
        }

        let report_path = work_dir.path().join("report.sarif");
        let report_arg = report_path.to_string_lossy().into_owned();
        let tree_arg = tree.to_string_lossy().into_owned();
        let classes_arg = classes_dir.to_string_lossy().into_owned();

        let outcome = run_tool(
            &binary,
            &[
                "-sarif",
                "-output",
                report_arg.as_str(),
                "-sourcepath",
                tree_arg.as_str(),
                classes_arg.as_str(),
            ],
            tree,
            self.timeout,
        )
        .await?;

        if let RunOutcome::TimedOut = outcome {
            warn!(tool = "spotbugs", "invocation timed out, skipping");
            return Ok(None);
        }

        // SpotBugs reports partial failures through its exit code but may
        // still have written a usable report; presence of the file decides.
        match std::fs::read_to_string(&report_path) {
            Ok(payload) if !payload.trim().is_empty() => {
                Ok(Some(RawOutput::new(ToolKind::SpotBugs, payload)))
            }
            Ok(_) => {
                warn!(tool = "spotbugs", "report file was empty, skipping");
                Ok(None)
            }
            Err(err) => {
                warn!(tool = "spotbugs", error = %err, "no report file produced, skipping");
                Ok(None)
            }
        }
    }
}
