use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use super::process::{binary_on_path, run_tool, RunOutcome};
use super::{RawOutput, ToolAdapter};
use crate::model::{Language, ToolKind};

/// Runs semgrep with its auto ruleset and captures SARIF from stdout.
/// Covers every supported language, as the broadest (pattern-level) net.
pub struct SemgrepAdapter {
    timeout: Duration,
}

impl SemgrepAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolAdapter for SemgrepAdapter {
    fn tool(&self) -> ToolKind {
        ToolKind::Semgrep
    }

    fn supports(&self, _language: Language) -> bool {
        true
    }

    fn scans_whole_tree(&self) -> bool {
        true
    }

    async fn probe(&self) -> bool {
        binary_on_path("semgrep").is_some()
    }

    async fn run(&self, tree: &Path, _language: Language) -> Result<Option<RawOutput>> {
        let Some(binary) = binary_on_path("semgrep") else {
            warn!(tool = "semgrep", "binary not found on PATH, skipping");
            return Ok(None);
        };

        let tree_arg = tree.to_string_lossy();
        let outcome = run_tool(
            &binary,
            &["--config=auto", "--sarif", "--quiet", tree_arg.as_ref()],
            tree,
            self.timeout,
        )
        .await?;

        let output = match outcome {
            RunOutcome::Completed(output) => output,
            RunOutcome::TimedOut => {
                warn!(tool = "semgrep", "invocation timed out, skipping");
                return Ok(None);
            }
        };

        // semgrep exits 1 when findings exist.
        if !output.exited_with(&[0, 1]) {
            warn!(
                tool = "semgrep",
                exit_code = ?output.exit_code,
                stderr = %output.stderr.trim(),
                "invocation failed, skipping"
            );
            return Ok(None);
        }

        if output.stdout.trim().is_empty() {
            warn!(tool = "semgrep", "produced no output, skipping");
            return Ok(None);
        }

        Ok(Some(RawOutput::new(ToolKind::Semgrep, output.stdout)))
    }
}
