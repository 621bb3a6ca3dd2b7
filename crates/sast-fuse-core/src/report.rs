use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::model::{Vulnerability, Verdict};

const SARIF_SCHEMA: &str =
    "https://raw.githubusercontent.com/oasis-tcs/sarif-spec/master/Schemata/sarif-schema-2.1.0.json";
const SARIF_VERSION: &str = "2.1.0";

/// Write one SARIF report per source file and return the paths written.
///
/// File names derive deterministically from the source file's relative path
/// (separators flattened to `_`). Each report is written to a temp sibling
/// and renamed into place, so a partially written report is never
/// observable.
pub fn write_reports(
    vulnerabilities: &[Vulnerability],
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    let mut by_file: BTreeMap<PathBuf, Vec<&Vulnerability>> = BTreeMap::new();
    for vulnerability in vulnerabilities {
        by_file
            .entry(vulnerability.primary.file.clone())
            .or_default()
            .push(vulnerability);
    }

    let mut written = Vec::new();
    for (source_file, group) in by_file {
        let report_path = output_dir.join(report_file_name(&source_file));
        let document = build_document(&group);
        let body = serde_json::to_string_pretty(&document)
            .context("failed to serialize SARIF report")?;

        let tmp_path = report_path.with_extension("sarif.tmp");
        std::fs::write(&tmp_path, body.as_bytes()).with_context(|| {
            format!("failed to write report scratch file {}", tmp_path.display())
        })?;
        std::fs::rename(&tmp_path, &report_path).with_context(|| {
            format!("failed to move report into place at {}", report_path.display())
        })?;

        info!(report = %report_path.display(), results = group.len(), "report written");
        written.push(report_path);
    }
    Ok(written)
}

/// `src/main.c` → `src_main.c.sarif`; full relative path so two files with
/// the same basename never collide.
pub fn report_file_name(source_file: &Path) -> String {
    let flattened: String = source_file
        .to_string_lossy()
        .chars()
        .map(|c| if std::path::is_separator(c) { '_' } else { c })
        .collect();
    format!("{flattened}.sarif")
}

fn build_document(group: &[&Vulnerability]) -> SarifDocument {
    let results = group.iter().map(|v| build_result(v)).collect();
    let contributing: Vec<String> = group
        .iter()
        .flat_map(|v| v.corroborating_tools())
        .map(|t| t.to_string())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    SarifDocument {
        schema: SARIF_SCHEMA,
        version: SARIF_VERSION,
        runs: vec![SarifRun {
            tool: SarifTool {
                driver: SarifDriver {
                    name: "sast-fuse",
                    version: env!("CARGO_PKG_VERSION"),
                    information_uri: "https://github.com/sast-fuse/sast-fuse",
                },
            },
            results,
            invocations: vec![SarifInvocation {
                execution_successful: true,
            }],
            properties: RunProperties {
                contributing_tools: contributing,
            },
        }],
    }
}

fn build_result(vulnerability: &Vulnerability) -> SarifResult {
    let primary = &vulnerability.primary;
    let uri = primary.file.to_string_lossy().into_owned();

    let fixes = vulnerability.patch().map(|patch| {
        vec![SarifFix {
            description: SarifText {
                text: format!(
                    "{} (source: {:?}, confidence: {:.2})",
                    patch.explanation, patch.source, patch.confidence
                ),
            },
            artifact_changes: vec![SarifArtifactChange {
                artifact_location: SarifArtifactLocation { uri: uri.clone() },
                replacements: vec![SarifReplacement {
                    deleted_region: SarifRegion {
                        start_line: primary.line,
                        start_column: Some(1),
                    },
                    inserted_content: SarifText {
                        text: patch.patched_line.clone(),
                    },
                }],
            }],
        }]
    });

    SarifResult {
        rule_id: primary.rule_id.clone(),
        level: primary.severity.as_sarif_level(),
        message: SarifText {
            text: format!("{}: {}", primary.rule_name, primary.message),
        },
        locations: vec![SarifLocation {
            physical_location: SarifPhysicalLocation {
                artifact_location: SarifArtifactLocation { uri },
                region: SarifRegion {
                    start_line: primary.line,
                    start_column: primary.column,
                },
            },
        }],
        properties: ResultProperties {
            fingerprint: vulnerability.fingerprint.as_str().to_string(),
            category: vulnerability.category.slug().to_string(),
            verdict: verdict_label(vulnerability.verdict()),
            corroborating_tools: vulnerability
                .corroborating_tools()
                .into_iter()
                .map(|t| t.to_string())
                .collect(),
            reachability: vulnerability.reachability.clone(),
        },
        fixes,
    }
}

fn verdict_label(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Unverified => "unverified",
        Verdict::Confirmed => "confirmed",
        Verdict::Rejected => "rejected",
    }
}

#[derive(Serialize)]
struct SarifDocument {
    #[serde(rename = "$schema")]
    schema: &'static str,
    version: &'static str,
    runs: Vec<SarifRun>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifRun {
    tool: SarifTool,
    results: Vec<SarifResult>,
    invocations: Vec<SarifInvocation>,
    properties: RunProperties,
}

#[derive(Serialize)]
struct SarifTool {
    driver: SarifDriver,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifDriver {
    name: &'static str,
    version: &'static str,
    information_uri: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifInvocation {
    execution_successful: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunProperties {
    contributing_tools: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifResult {
    rule_id: String,
    level: &'static str,
    message: SarifText,
    locations: Vec<SarifLocation>,
    properties: ResultProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    fixes: Option<Vec<SarifFix>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultProperties {
    fingerprint: String,
    category: String,
    verdict: &'static str,
    corroborating_tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reachability: Option<crate::model::Reachability>,
}

#[derive(Serialize)]
struct SarifText {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifLocation {
    physical_location: SarifPhysicalLocation,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifPhysicalLocation {
    artifact_location: SarifArtifactLocation,
    region: SarifRegion,
}

#[derive(Serialize)]
struct SarifArtifactLocation {
    uri: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifRegion {
    start_line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_column: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifFix {
    description: SarifText,
    artifact_changes: Vec<SarifArtifactChange>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifArtifactChange {
    artifact_location: SarifArtifactLocation,
    replacements: Vec<SarifReplacement>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SarifReplacement {
    deleted_region: SarifRegion,
    inserted_content: SarifText,
}
