use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use super::process::{binary_on_path, run_tool, RunOutcome};
use super::{RawOutput, ToolAdapter};
use crate::model::{Language, ToolKind};

/// Runs bandit recursively over Python sources, capturing its JSON report.
pub struct BanditAdapter {
    timeout: Duration,
}

impl BanditAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolAdapter for BanditAdapter {
    fn tool(&self) -> ToolKind {
        ToolKind::Bandit
    }

    fn supports(&self, language: Language) -> bool {
        language == Language::Python
    }

    async fn probe(&self) -> bool {
        binary_on_path("bandit").is_some()
    }

    async fn run(&self, tree: &Path, _language: Language) -> Result<Option<RawOutput>> {
        let Some(binary) = binary_on_path("bandit") else {
            warn!(tool = "bandit", "binary not found on PATH, skipping");
            return Ok(None);
        };

        let tree_arg = tree.to_string_lossy();
        let outcome = run_tool(
            &binary,
            &["-r", tree_arg.as_ref(), "-f", "json", "-ll"],
            tree,
            self.timeout,
        )
        .await?;

        let output = match outcome {
            RunOutcome::Completed(output) => output,
            RunOutcome::TimedOut => {
                warn!(tool = "bandit", "invocation timed out, skipping");
                return Ok(None);
            }
        };

        // bandit exits 1 when issues are found.
        if !output.exited_with(&[0, 1]) {
            warn!(
                tool = "bandit",
                exit_code = ?output.exit_code,
                stderr = %output.stderr.trim(),
                "invocation failed, skipping"
            );
            return Ok(None);
        }

        if output.stdout.trim().is_empty() {
            warn!(tool = "bandit", "produced no output, skipping");
            return Ok(None);
        }

        Ok(Some(RawOutput::new(ToolKind::Bandit, output.stdout)))
    }
}
