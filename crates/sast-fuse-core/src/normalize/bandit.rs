use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::rebase;
use crate::model::{BoundedSnippet, Finding, Severity, ToolKind};

/// Extract findings from bandit's JSON report.
pub fn parse(payload: &str, project_root: &Path, snippet_limit: usize) -> Result<Vec<Finding>> {
    let report: BanditReport =
        serde_json::from_str(payload).context("invalid bandit JSON report")?;
    let raw_size = payload.len();

    Ok(report
        .results
        .into_iter()
        .map(|issue| Finding {
            tool: ToolKind::Bandit,
            rule_name: issue.test_name.clone(),
            rule_id: issue.test_id,
            file: rebase(&issue.filename, project_root),
            line: issue.line_number,
            column: None,
            severity: map_severity(&issue.issue_severity),
            message: issue.issue_text,
            snippet: BoundedSnippet::new(&issue.code, snippet_limit),
            raw_size,
        })
        .collect())
}

fn map_severity(severity: &str) -> Severity {
    match severity.to_ascii_uppercase().as_str() {
        "HIGH" => Severity::Error,
        "LOW" => Severity::Note,
        _ => Severity::Warning,
    }
}

#[derive(Deserialize)]
struct BanditReport {
    #[serde(default)]
    results: Vec<BanditIssue>,
}

#[derive(Deserialize)]
struct BanditIssue {
    filename: String,
    line_number: u32,
    test_id: String,
    test_name: String,
    issue_text: String,
    issue_severity: String,
    #[serde(default)]
    code: String,
}
