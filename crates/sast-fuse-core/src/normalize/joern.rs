use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use tracing::debug;

use super::rebase;
use crate::model::{BoundedSnippet, Finding, Severity, ToolKind};

/// Extract findings from the JSON lines emitted by the joern query scripts.
/// Each line is either an array of hits or an envelope with a `response`
/// array; lines that parse as neither are skipped, not fatal, because joern
/// interleaves its own log output.
pub fn parse(payload: &str, project_root: &Path, snippet_limit: usize) -> Result<Vec<Finding>> {
    let raw_size = payload.len();
    let mut findings = Vec::new();

    for line in payload.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let hits: Vec<JoernHit> = match serde_json::from_str::<JoernLine>(line) {
            Ok(JoernLine::Hits(hits)) => hits,
            Ok(JoernLine::Envelope { response }) => response,
            Err(err) => {
                debug!(error = %err, "skipping non-result joern line");
                continue;
            }
        };

        for hit in hits {
            findings.push(Finding {
                tool: ToolKind::Joern,
                rule_id: hit.rule_id.clone(),
                rule_name: hit.rule_name,
                file: rebase(&hit.file, project_root),
                line: hit.line,
                column: None,
                severity: Severity::Warning,
                message: format!("{}: {}", hit.rule_id, hit.code),
                snippet: BoundedSnippet::new(&hit.code, snippet_limit),
                raw_size,
            });
        }
    }

    Ok(findings)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum JoernLine {
    Hits(Vec<JoernHit>),
    Envelope { response: Vec<JoernHit> },
}

#[derive(Deserialize)]
struct JoernHit {
    rule_id: String,
    rule_name: String,
    file: String,
    line: u32,
    #[serde(default)]
    code: String,
}
