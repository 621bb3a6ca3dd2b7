use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::debug;

use crate::model::{DefectCategory, Finding, Fingerprint, Vulnerability};

/// Merge findings that address the same defect at the same location into
/// single vulnerabilities.
///
/// Grouping key is (file, category); within a group, findings whose lines
/// sit within `line_tolerance` of the cluster chain merge. The primary
/// finding is chosen by tool priority, so a dataflow tool's message
/// represents the group even when a pattern matcher also fired. Output
/// ordering is (file, anchor line, fingerprint) — independent of the order
/// tools happened to finish in.
pub fn aggregate(findings: Vec<Finding>, line_tolerance: u32) -> Vec<Vulnerability> {
    let mut groups: BTreeMap<(PathBuf, DefectCategory), Vec<Finding>> = BTreeMap::new();
    for finding in findings {
        let key = (finding.file.clone(), finding.category());
        groups.entry(key).or_default().push(finding);
    }

    let mut vulnerabilities = Vec::new();
    for ((file, category), mut members) in groups {
        // Canonical in-group order; clustering below only depends on this,
        // never on arrival order.
        members.sort_by(|a, b| {
            a.line
                .cmp(&b.line)
                .then_with(|| b.tool.priority().cmp(&a.tool.priority()))
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });

        let mut cluster: Vec<Finding> = Vec::new();
        for finding in members {
            let chain_break = cluster
                .last()
                .map(|prev| finding.line.saturating_sub(prev.line) > line_tolerance)
                .unwrap_or(false);
            if chain_break {
                vulnerabilities.push(build_vulnerability(
                    std::mem::take(&mut cluster),
                    category,
                ));
            }
            cluster.push(finding);
        }
        if !cluster.is_empty() {
            vulnerabilities.push(build_vulnerability(cluster, category));
        }
        debug!(file = %file.display(), category = %category, "aggregated finding group");
    }

    vulnerabilities.sort_by(|a, b| {
        a.primary
            .file
            .cmp(&b.primary.file)
            .then_with(|| a.primary.line.cmp(&b.primary.line))
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
    vulnerabilities
}

fn build_vulnerability(cluster: Vec<Finding>, category: DefectCategory) -> Vulnerability {
    debug_assert!(!cluster.is_empty());
    let anchor_line = cluster.iter().map(|f| f.line).min().unwrap_or(0);

    let primary_idx = cluster
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.tool
                .priority()
                .cmp(&b.tool.priority())
                .then_with(|| a.severity.cmp(&b.severity))
                .then_with(|| b.rule_id.cmp(&a.rule_id))
                .then_with(|| b.line.cmp(&a.line))
        })
        .map(|(idx, _)| idx)
        .unwrap_or(0);

    let mut cluster = cluster;
    let primary = cluster.remove(primary_idx);
    let fingerprint = Fingerprint::new(&primary.file, anchor_line, category);

    Vulnerability::new(fingerprint, primary, cluster, category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BoundedSnippet, Severity, ToolKind, DEFAULT_SNIPPET_LIMIT};
    use std::path::PathBuf;

    fn finding(tool: ToolKind, rule_id: &str, file: &str, line: u32) -> Finding {
        Finding {
            tool,
            rule_id: rule_id.into(),
            rule_name: rule_id.into(),
            file: PathBuf::from(file),
            line,
            column: Some(1),
            severity: Severity::Warning,
            message: format!("{rule_id} detected"),
            snippet: BoundedSnippet::new("strcpy(dst, src);", DEFAULT_SNIPPET_LIMIT),
            raw_size: 1024,
        }
    }

    #[test]
    fn two_tools_same_line_merge_into_one() {
        let findings = vec![
            finding(ToolKind::Semgrep, "rules.insecure-strcpy-buffer", "src/main.c", 42),
            finding(ToolKind::CodeQl, "cpp/unbounded-write CWE-120", "src/main.c", 42),
        ];
        let vulns = aggregate(findings, 2);
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].primary.tool, ToolKind::CodeQl);
        assert_eq!(vulns[0].corroborating.len(), 1);
        assert!(vulns[0].is_corroborated());
    }

    #[test]
    fn nearby_lines_merge_within_tolerance() {
        let findings = vec![
            finding(ToolKind::Semgrep, "rules.buffer-a", "src/main.c", 40),
            finding(ToolKind::Joern, "CWE-119", "src/main.c", 42),
        ];
        assert_eq!(aggregate(findings.clone(), 2).len(), 1);
        assert_eq!(aggregate(findings, 1).len(), 2);
    }

    #[test]
    fn different_categories_never_merge() {
        let findings = vec![
            finding(ToolKind::Semgrep, "rules.buffer-overflow", "src/main.c", 42),
            finding(ToolKind::Semgrep, "rules.sql-injection", "src/main.c", 42),
        ];
        let vulns = aggregate(findings, 2);
        assert_eq!(vulns.len(), 2);
    }

    #[test]
    fn output_order_is_independent_of_input_order() {
        let a = finding(ToolKind::Semgrep, "rules.buffer-x", "src/a.c", 10);
        let b = finding(ToolKind::CodeQl, "cpp/overflow CWE-120", "src/a.c", 11);
        let c = finding(ToolKind::Bandit, "B608 sql", "app/db.py", 5);

        let forward = aggregate(vec![a.clone(), b.clone(), c.clone()], 2);
        let reversed = aggregate(vec![c, b, a], 2);

        let forward_fps: Vec<_> = forward.iter().map(|v| v.fingerprint.clone()).collect();
        let reversed_fps: Vec<_> = reversed.iter().map(|v| v.fingerprint.clone()).collect();
        assert_eq!(forward_fps, reversed_fps);
        assert_eq!(forward[0].primary.file, PathBuf::from("app/db.py"));
    }

    #[test]
    fn aggregation_is_idempotent() {
        let findings = vec![
            finding(ToolKind::Semgrep, "rules.buffer-x", "src/a.c", 10),
            finding(ToolKind::CodeQl, "cpp/overflow CWE-120", "src/a.c", 11),
            finding(ToolKind::Semgrep, "rules.buffer-y", "src/b.c", 3),
        ];
        let first = aggregate(findings.clone(), 2);
        let second = aggregate(findings, 2);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.fingerprint, b.fingerprint);
            assert_eq!(a.corroborating.len(), b.corroborating.len());
        }
    }

    #[test]
    fn fingerprint_anchors_on_cluster_minimum_line() {
        let findings = vec![
            finding(ToolKind::CodeQl, "cpp/overflow CWE-120", "src/a.c", 12),
            finding(ToolKind::Semgrep, "rules.buffer-x", "src/a.c", 10),
        ];
        let vulns = aggregate(findings, 2);
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].fingerprint.as_str(), "src/a.c:10:memory-safety");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_finding() -> impl Strategy<Value = Finding> {
            (
                prop_oneof![
                    Just(ToolKind::Semgrep),
                    Just(ToolKind::CodeQl),
                    Just(ToolKind::Bandit)
                ],
                prop_oneof![Just("rules.buffer-copy"), Just("rules.sql-injection")],
                prop_oneof![Just("src/a.c"), Just("src/b.c")],
                1u32..60,
            )
                .prop_map(|(tool, rule, file, line)| finding(tool, rule, file, line))
        }

        proptest! {
            #[test]
            fn order_never_changes_the_result(
                findings in proptest::collection::vec(arb_finding(), 0..24),
                seed in 0u64..1000
            ) {
                let mut shuffled = findings.clone();
                // Deterministic pseudo-shuffle driven by the seed.
                let len = shuffled.len();
                if len > 1 {
                    for i in 0..len {
                        let j = ((seed as usize).wrapping_mul(31).wrapping_add(i * 7)) % len;
                        shuffled.swap(i, j);
                    }
                }

                let original: Vec<_> = aggregate(findings, 2)
                    .into_iter()
                    .map(|v| (v.fingerprint.clone(), v.corroborating.len()))
                    .collect();
                let permuted: Vec<_> = aggregate(shuffled, 2)
                    .into_iter()
                    .map(|v| (v.fingerprint.clone(), v.corroborating.len()))
                    .collect();
                prop_assert_eq!(original, permuted);
            }

            #[test]
            fn every_input_finding_survives_somewhere(
                findings in proptest::collection::vec(arb_finding(), 0..24)
            ) {
                let total = findings.len();
                let vulns = aggregate(findings, 2);
                let preserved: usize = vulns
                    .iter()
                    .map(|v| 1 + v.corroborating.len())
                    .sum();
                prop_assert_eq!(total, preserved);
            }
        }
    }
}
