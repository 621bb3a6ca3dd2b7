use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::{first_sentence, rebase};
use crate::model::{BoundedSnippet, Finding, Severity, ToolKind};

/// Lightweight SARIF extraction shared by the SARIF-emitting tools.
///
/// Only location, rule identity, message, severity, and a bounded snippet
/// survive; extended rule metadata, help text, and full descriptions are
/// dropped before anything downstream sees them. Results are converted one
/// at a time rather than transforming the whole payload in memory.
pub fn parse(
    tool: ToolKind,
    payload: &str,
    project_root: &Path,
    snippet_limit: usize,
) -> Result<Vec<Finding>> {
    let doc: SarifDoc = serde_json::from_str(payload).context("invalid SARIF document")?;
    let raw_size = payload.len();
    let mut findings = Vec::new();

    for run in doc.runs {
        // Side table of rule id → short name and security score; everything
        // else in the rule object is discarded.
        let mut rule_names: HashMap<&str, String> = HashMap::new();
        let mut rule_scores: HashMap<&str, f32> = HashMap::new();
        for rule in &run.tool.driver.rules {
            if let Some(desc) = &rule.short_description {
                rule_names.insert(rule.id.as_str(), first_sentence(&desc.text));
            }
            if let Some(score) = rule
                .properties
                .get("security-severity")
                .and_then(score_from_property)
            {
                rule_scores.insert(rule.id.as_str(), score);
            }
        }

        for result in run.results {
            let Some(rule_id) = result.rule_id else {
                continue;
            };
            let message = result.message.text;
            if message.is_empty() {
                continue;
            }

            let severity = match rule_scores.get(rule_id.as_str()) {
                Some(score) => Severity::from_security_score(*score),
                None => Severity::from_sarif_level(result.level.as_deref().unwrap_or("warning")),
            };
            let rule_name = rule_names
                .get(rule_id.as_str())
                .cloned()
                .unwrap_or_else(|| rule_id.clone());

            for location in result.locations {
                let Some(physical) = location.physical_location else {
                    continue;
                };
                let Some(uri) = physical.artifact_location.and_then(|a| a.uri) else {
                    continue;
                };
                let region = physical.region.unwrap_or_default();
                let snippet = region
                    .snippet
                    .map(|s| BoundedSnippet::new(&s.text, snippet_limit))
                    .unwrap_or_else(BoundedSnippet::empty);

                findings.push(Finding {
                    tool,
                    rule_id: rule_id.clone(),
                    rule_name: rule_name.clone(),
                    file: rebase(&uri, project_root),
                    line: region.start_line.unwrap_or(1),
                    column: region.start_column,
                    severity,
                    message: message.clone(),
                    snippet,
                    raw_size,
                });
            }
        }
    }

    Ok(findings)
}

fn score_from_property(value: &serde_json::Value) -> Option<f32> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64().map(|f| f as f32),
        _ => None,
    }
}

#[derive(Deserialize)]
struct SarifDoc {
    #[serde(default)]
    runs: Vec<SarifRun>,
}

#[derive(Deserialize)]
struct SarifRun {
    tool: SarifTool,
    #[serde(default)]
    results: Vec<SarifResult>,
}

#[derive(Deserialize)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Deserialize)]
struct SarifDriver {
    #[serde(default)]
    rules: Vec<SarifRule>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SarifRule {
    id: String,
    short_description: Option<SarifText>,
    #[serde(default)]
    properties: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SarifResult {
    rule_id: Option<String>,
    level: Option<String>,
    #[serde(default)]
    message: SarifText,
    #[serde(default)]
    locations: Vec<SarifLocation>,
}

#[derive(Deserialize, Default)]
struct SarifText {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SarifLocation {
    physical_location: Option<SarifPhysicalLocation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SarifPhysicalLocation {
    artifact_location: Option<SarifArtifactLocation>,
    region: Option<SarifRegion>,
}

#[derive(Deserialize)]
struct SarifArtifactLocation {
    uri: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SarifRegion {
    start_line: Option<u32>,
    start_column: Option<u32>,
    snippet: Option<SarifText>,
}
