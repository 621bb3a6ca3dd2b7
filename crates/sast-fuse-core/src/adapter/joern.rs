use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tempfile::TempDir;
use tracing::warn;

use super::process::{binary_on_path, run_tool, RunOutcome};
use super::{RawOutput, ToolAdapter};
use crate::model::{Language, ToolKind};

/// Dangerous-call queries run against the code property graph. Each entry is
/// (rule id, rule name, joern script); scripts print one JSON array.
const QUERIES: &[(&str, &str, &str)] = &[
    (
        "CWE-119",
        "Buffer Overflow",
        r#"cpg.call.name("(strcpy|strcat|memcpy|sprintf|gets)").l.map { c =>
  Map(
    "rule_id" -> "CWE-119",
    "rule_name" -> "Buffer Overflow",
    "file" -> c.file.name.headOption.getOrElse("unknown"),
    "line" -> c.lineNumber.headOption.getOrElse(0),
    "code" -> c.code
  )
}.toJson"#,
    ),
    (
        "CWE-416",
        "Use After Free",
        r#"cpg.call.name("free").l.map { c =>
  Map(
    "rule_id" -> "CWE-416",
    "rule_name" -> "Use After Free",
    "file" -> c.file.name.headOption.getOrElse("unknown"),
    "line" -> c.lineNumber.headOption.getOrElse(0),
    "code" -> c.code
  )
}.toJson"#,
    ),
    (
        "CWE-476",
        "NULL Pointer Dereference",
        r#"cpg.call.where(_.argument.code("NULL")).l.map { c =>
  Map(
    "rule_id" -> "CWE-476",
    "rule_name" -> "NULL Pointer Dereference",
    "file" -> c.file.name.headOption.getOrElse("unknown"),
    "line" -> c.lineNumber.headOption.getOrElse(0),
    "code" -> c.code
  )
}.toJson"#,
    ),
];

/// Runs Joern against C/C++ trees: builds a code property graph in a scoped
/// work directory, then executes dangerous-call queries against it. Query
/// results are concatenated as JSON lines for the normalizer.
pub struct JoernAdapter {
    timeout: Duration,
}

impl JoernAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ToolAdapter for JoernAdapter {
    fn tool(&self) -> ToolKind {
        ToolKind::Joern
    }

    fn supports(&self, language: Language) -> bool {
        matches!(language, Language::C | Language::Cpp)
    }

    async fn probe(&self) -> bool {
        binary_on_path("joern-parse").is_some() && binary_on_path("joern").is_some()
    }

    async fn run(&self, tree: &Path, _language: Language) -> Result<Option<RawOutput>> {
        let (Some(parse_binary), Some(joern_binary)) =
            (binary_on_path("joern-parse"), binary_on_path("joern"))
        else {
            warn!(tool = "joern", "joern-parse/joern not found on PATH, skipping");
            return Ok(None);
        };

        let work_dir = TempDir::new().context("failed to create joern work directory")?;
        let cpg_path = work_dir.path().join("cpg.bin");
        let cpg_arg = cpg_path.to_string_lossy().into_owned();
        let tree_arg = tree.to_string_lossy().into_owned();

        match run_tool(
            &parse_binary,
            &[tree_arg.as_str(), "--output", cpg_arg.as_str()],
            tree,
            self.timeout,
        )
        .await?
        {
            RunOutcome::Completed(output) if output.exited_with(&[0]) && cpg_path.exists() => {}
            RunOutcome::Completed(output) => {
                warn!(
                    tool = "joern",
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "cpg construction failed, skipping"
                );
                return Ok(None);
            }
            RunOutcome::TimedOut => {
                warn!(tool = "joern", "cpg construction timed out, skipping");
                return Ok(None);
            }
        }

        let mut payload = String::new();
        for (rule_id, rule_name, query) in QUERIES {
            let script_path = work_dir.path().join(format!("{rule_id}.sc"));
            std::fs::write(&script_path, query)
                .with_context(|| format!("failed to write joern query for {rule_id}"))?;
            let script_arg = script_path.to_string_lossy().into_owned();

            let outcome = run_tool(
                &joern_binary,
                &[
                    "--script",
                    script_arg.as_str(),
                    "--cpg",
                    cpg_arg.as_str(),
                ],
                tree,
                self.timeout,
            )
            .await?;

            match outcome {
                RunOutcome::Completed(output) if output.exited_with(&[0]) => {
                    // Joern interleaves log lines with output; keep only JSON.
                    for line in output.stdout.lines() {
                        let line = line.trim();
                        if line.starts_with('[') || line.starts_with('{') {
                            payload.push_str(line);
                            payload.push('\n');
                        }
                    }
                }
                RunOutcome::Completed(output) => {
                    warn!(
                        tool = "joern",
                        rule = rule_name,
                        exit_code = ?output.exit_code,
                        "query failed, continuing with remaining queries"
                    );
                }
                RunOutcome::TimedOut => {
                    warn!(
                        tool = "joern",
                        rule = rule_name,
                        "query timed out, continuing with remaining queries"
                    );
                }
            }
        }

        if payload.trim().is_empty() {
            warn!(tool = "joern", "queries produced no output, skipping");
            return Ok(None);
        }

        Ok(Some(RawOutput::new(ToolKind::Joern, payload)))
    }
}
