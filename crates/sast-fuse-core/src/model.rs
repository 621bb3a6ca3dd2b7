use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default character bound applied to finding snippets.
pub const DEFAULT_SNIPPET_LIMIT: usize = 200;

/// Marker appended to snippets that were cut at the character bound.
pub const TRUNCATION_MARKER: &str = "…";

/// Severity levels shared across all tools, aligned with SARIF `level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl Severity {
    pub fn as_sarif_level(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Note => "note",
        }
    }

    /// Map a SARIF `level` string; anything unrecognized becomes `Warning`.
    pub fn from_sarif_level(level: &str) -> Self {
        match level {
            "error" => Severity::Error,
            "note" | "none" => Severity::Note,
            _ => Severity::Warning,
        }
    }

    /// Map a numeric `security-severity` score (0–10) into a level.
    pub fn from_security_score(score: f32) -> Self {
        if score >= 7.0 {
            Severity::Error
        } else if score >= 4.0 {
            Severity::Warning
        } else {
            Severity::Note
        }
    }
}

/// Source languages the pipeline knows how to route to analyzers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Java,
    Python,
    JavaScript,
}

impl Language {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "c" | "h" => Some(Language::C),
            "cpp" | "cc" | "cxx" | "hpp" | "hxx" => Some(Language::Cpp),
            "java" => Some(Language::Java),
            "py" => Some(Language::Python),
            "js" | "jsx" | "ts" | "tsx" => Some(Language::JavaScript),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of supported analyzers. Adding a tool means adding a variant
/// and an adapter, never touching the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    CodeQl,
    Joern,
    SpotBugs,
    Bandit,
    Semgrep,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::CodeQl => "codeql",
            ToolKind::Joern => "joern",
            ToolKind::SpotBugs => "spotbugs",
            ToolKind::Bandit => "bandit",
            ToolKind::Semgrep => "semgrep",
        }
    }

    /// Priority used when choosing a group's primary finding. Deep dataflow
    /// tools outrank byte-pattern matchers.
    pub fn priority(&self) -> u8 {
        match self {
            ToolKind::CodeQl => 40,
            ToolKind::Joern => 30,
            ToolKind::SpotBugs => 20,
            ToolKind::Bandit => 15,
            ToolKind::Semgrep => 10,
        }
    }

    pub const ALL: [ToolKind; 5] = [
        ToolKind::CodeQl,
        ToolKind::Joern,
        ToolKind::SpotBugs,
        ToolKind::Bandit,
        ToolKind::Semgrep,
    ];
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared defect taxonomy every tool-specific rule id is mapped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefectCategory {
    MemorySafety,
    Injection,
    NullDeref,
    CredentialExposure,
    Other,
}

static CWE_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)CWE-(\d+)").expect("static pattern"));

impl DefectCategory {
    pub fn slug(&self) -> &'static str {
        match self {
            DefectCategory::MemorySafety => "memory-safety",
            DefectCategory::Injection => "injection",
            DefectCategory::NullDeref => "null-deref",
            DefectCategory::CredentialExposure => "credential-exposure",
            DefectCategory::Other => "other",
        }
    }

    /// Classify a tool rule into the shared taxonomy. CWE identifiers win
    /// when present; otherwise rule-id and message keywords decide.
    pub fn classify(rule_id: &str, message: &str) -> Self {
        if let Some(caps) = CWE_ID.captures(rule_id).or_else(|| CWE_ID.captures(message)) {
            if let Ok(cwe) = caps[1].parse::<u32>() {
                match cwe {
                    119 | 120 | 121 | 122 | 125 | 415 | 416 | 787 => {
                        return DefectCategory::MemorySafety
                    }
                    77 | 78 | 79 | 89 | 943 => return DefectCategory::Injection,
                    476 => return DefectCategory::NullDeref,
                    259 | 321 | 522 | 798 => return DefectCategory::CredentialExposure,
                    _ => {}
                }
            }
        }

        let haystack = format!("{} {}", rule_id, message).to_ascii_lowercase();
        if ["buffer", "overflow", "strcpy", "memcpy", "out-of-bounds", "use-after-free"]
            .iter()
            .any(|kw| haystack.contains(kw))
        {
            DefectCategory::MemorySafety
        } else if ["sql", "injection", "command-inj", "xss", "tainted"]
            .iter()
            .any(|kw| haystack.contains(kw))
        {
            DefectCategory::Injection
        } else if haystack.contains("null") || rule_id.starts_with("NP_") {
            DefectCategory::NullDeref
        } else if ["hardcoded", "credential", "secret", "password", "api key"]
            .iter()
            .any(|kw| haystack.contains(kw))
        {
            DefectCategory::CredentialExposure
        } else {
            DefectCategory::Other
        }
    }
}

impl fmt::Display for DefectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Code excerpt whose character count never exceeds the configured bound.
/// Construction is the only way to obtain one, so the invariant holds for
/// every finding that reaches the LLM prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundedSnippet {
    text: String,
    truncated: bool,
}

impl BoundedSnippet {
    /// Truncate `raw` to at most `limit` characters. When truncation occurs
    /// the marker is appended and counts against nothing: the bound applies
    /// to the retained source text.
    pub fn new(raw: &str, limit: usize) -> Self {
        let mut chars = raw.chars();
        let text: String = chars.by_ref().take(limit).collect();
        if chars.next().is_some() {
            Self {
                text: text + TRUNCATION_MARKER,
                truncated: true,
            }
        } else {
            Self {
                text,
                truncated: false,
            }
        }
    }

    pub fn empty() -> Self {
        Self {
            text: String::new(),
            truncated: false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Character count excluding the truncation marker.
    pub fn source_chars(&self) -> usize {
        let total = self.text.chars().count();
        if self.truncated {
            total - TRUNCATION_MARKER.chars().count()
        } else {
            total
        }
    }
}

/// One normalized detection from one tool. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub tool: ToolKind,
    pub rule_id: String,
    /// Short rule name, derived from the first sentence of the tool's
    /// description rather than the full text.
    pub rule_name: String,
    pub file: PathBuf,
    pub line: u32,
    pub column: Option<u32>,
    pub severity: Severity,
    pub message: String,
    pub snippet: BoundedSnippet,
    /// Bytes of raw tool payload this finding was extracted from.
    pub raw_size: usize,
}

impl Finding {
    pub fn category(&self) -> DefectCategory {
        DefectCategory::classify(&self.rule_id, &self.message)
    }
}

/// Deterministic identity of a deduplicated vulnerability: relative file,
/// the cluster's anchor line, and the defect category slug. Stable across
/// runs on unchanged source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(file: &Path, anchor_line: u32, category: DefectCategory) -> Self {
        Self(format!(
            "{}:{}:{}",
            file.to_string_lossy(),
            anchor_line,
            category.slug()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reachability verdict attached by the auxiliary analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reachability {
    Reachable { path: Vec<String> },
    Unreachable,
    Unknown,
}

impl Reachability {
    /// The verification stage treats `Unknown` as reachable: a vulnerability
    /// is never downgraded because reachability could not be proven.
    pub fn assume_reachable(&self) -> bool {
        !matches!(self, Reachability::Unreachable)
    }

    pub fn concrete_path(&self) -> Option<&[String]> {
        match self {
            Reachability::Reachable { path } if !path.is_empty() => Some(path),
            _ => None,
        }
    }
}

/// Verification outcome. Transitions only forward from `Unverified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Unverified,
    Confirmed,
    Rejected,
}

/// Where a patch came from; LLM patches carry higher confidence than the
/// deterministic fallback table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchSource {
    Llm,
    Rule,
}

/// Suggested single-line fix for a confirmed vulnerability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub original_line: String,
    pub patched_line: String,
    pub explanation: String,
    pub confidence: f32,
    pub source: PatchSource,
}

/// Error raised when a verdict transition would move backwards.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("vulnerability `{fingerprint}` already resolved to {verdict:?}")]
pub struct VerdictError {
    pub fingerprint: String,
    pub verdict: Verdict,
}

/// A deduplicated, possibly multi-tool-corroborated defect candidate.
///
/// Owned by the aggregator until handed to verification, which may only
/// resolve the verdict and attach a patch; `confirm`/`reject` are the sole
/// mutation points and each refuses to run twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub fingerprint: Fingerprint,
    pub primary: Finding,
    pub corroborating: Vec<Finding>,
    pub category: DefectCategory,
    pub reachability: Option<Reachability>,
    verdict: Verdict,
    patch: Option<Patch>,
}

impl Vulnerability {
    pub fn new(
        fingerprint: Fingerprint,
        primary: Finding,
        corroborating: Vec<Finding>,
        category: DefectCategory,
    ) -> Self {
        Self {
            fingerprint,
            primary,
            corroborating,
            category,
            reachability: None,
            verdict: Verdict::Unverified,
            patch: None,
        }
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn patch(&self) -> Option<&Patch> {
        self.patch.as_ref()
    }

    /// Distinct tools that reported this defect, primary included.
    pub fn corroborating_tools(&self) -> BTreeSet<ToolKind> {
        let mut tools: BTreeSet<ToolKind> = self.corroborating.iter().map(|f| f.tool).collect();
        tools.insert(self.primary.tool);
        tools
    }

    /// Confirmed by two or more independent tools. Raises prior confidence
    /// in the verification prompt but never skips verification.
    pub fn is_corroborated(&self) -> bool {
        self.corroborating_tools().len() >= 2
    }

    pub fn confirm(&mut self, patch: Patch) -> Result<(), VerdictError> {
        self.ensure_unverified()?;
        self.verdict = Verdict::Confirmed;
        self.patch = Some(patch);
        Ok(())
    }

    pub fn reject(&mut self) -> Result<(), VerdictError> {
        self.ensure_unverified()?;
        self.verdict = Verdict::Rejected;
        self.patch = None;
        Ok(())
    }

    fn ensure_unverified(&self) -> Result<(), VerdictError> {
        if self.verdict != Verdict::Unverified {
            return Err(VerdictError {
                fingerprint: self.fingerprint.as_str().to_string(),
                verdict: self.verdict,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(tool: ToolKind, rule_id: &str, line: u32) -> Finding {
        Finding {
            tool,
            rule_id: rule_id.into(),
            rule_name: rule_id.into(),
            file: PathBuf::from("src/main.c"),
            line,
            column: Some(1),
            severity: Severity::Warning,
            message: "unguarded copy".into(),
            snippet: BoundedSnippet::new("strcpy(dst, src);", DEFAULT_SNIPPET_LIMIT),
            raw_size: 512,
        }
    }

    #[test]
    fn snippet_respects_bound_and_marks_truncation() {
        let long = "x".repeat(300);
        let snippet = BoundedSnippet::new(&long, 200);
        assert!(snippet.is_truncated());
        assert_eq!(snippet.source_chars(), 200);
        assert!(snippet.as_str().ends_with(TRUNCATION_MARKER));

        let short = BoundedSnippet::new("short", 200);
        assert!(!short.is_truncated());
        assert_eq!(short.as_str(), "short");
    }

    #[test]
    fn snippet_bound_counts_chars_not_bytes() {
        let text = "é".repeat(10);
        let snippet = BoundedSnippet::new(&text, 4);
        assert!(snippet.is_truncated());
        assert_eq!(snippet.source_chars(), 4);
    }

    #[test]
    fn cwe_ids_drive_classification() {
        assert_eq!(
            DefectCategory::classify("CWE-119", "stack buffer write"),
            DefectCategory::MemorySafety
        );
        assert_eq!(
            DefectCategory::classify("java/sql-injection CWE-89", ""),
            DefectCategory::Injection
        );
        assert_eq!(
            DefectCategory::classify("CWE-476", "deref"),
            DefectCategory::NullDeref
        );
        assert_eq!(
            DefectCategory::classify("B105", "hardcoded password string"),
            DefectCategory::CredentialExposure
        );
    }

    #[test]
    fn keyword_fallback_classification() {
        assert_eq!(
            DefectCategory::classify("rules.buffer-copy", "possible overflow"),
            DefectCategory::MemorySafety
        );
        assert_eq!(
            DefectCategory::classify("NP_ALWAYS_NULL", "Null pointer dereference"),
            DefectCategory::NullDeref
        );
        assert_eq!(
            DefectCategory::classify("UNKNOWN_RULE", "style issue"),
            DefectCategory::Other
        );
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = Fingerprint::new(Path::new("src/a.c"), 10, DefectCategory::MemorySafety);
        let b = Fingerprint::new(Path::new("src/a.c"), 10, DefectCategory::MemorySafety);
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "src/a.c:10:memory-safety");
    }

    #[test]
    fn verdict_moves_only_forward() {
        let f = finding(ToolKind::Semgrep, "rules.buffer", 10);
        let fp = Fingerprint::new(&f.file, f.line, DefectCategory::MemorySafety);
        let mut vuln = Vulnerability::new(fp, f, Vec::new(), DefectCategory::MemorySafety);

        vuln.reject().unwrap();
        assert_eq!(vuln.verdict(), Verdict::Rejected);
        assert!(vuln.patch().is_none());

        let patch = Patch {
            original_line: "strcpy(a, b);".into(),
            patched_line: "strncpy(a, b, sizeof(a));".into(),
            explanation: "bounded copy".into(),
            confidence: 0.5,
            source: PatchSource::Rule,
        };
        let err = vuln.confirm(patch).unwrap_err();
        assert_eq!(err.verdict, Verdict::Rejected);
    }

    #[test]
    fn corroboration_requires_distinct_tools() {
        let primary = finding(ToolKind::CodeQl, "cpp/unbounded-write", 10);
        let same_tool = finding(ToolKind::CodeQl, "cpp/other", 11);
        let fp = Fingerprint::new(&primary.file, 10, DefectCategory::MemorySafety);
        let vuln = Vulnerability::new(
            fp.clone(),
            primary.clone(),
            vec![same_tool],
            DefectCategory::MemorySafety,
        );
        assert!(!vuln.is_corroborated());

        let other_tool = finding(ToolKind::Semgrep, "rules.buffer", 11);
        let vuln = Vulnerability::new(fp, primary, vec![other_tool], DefectCategory::MemorySafety);
        assert!(vuln.is_corroborated());
    }

    #[test]
    fn unknown_reachability_is_assumed_reachable() {
        assert!(Reachability::Unknown.assume_reachable());
        assert!(!Reachability::Unreachable.assume_reachable());
        assert!(Reachability::Reachable { path: vec![] }.assume_reachable());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn snippet_never_exceeds_the_bound(raw in ".{0,400}", limit in 1usize..300) {
                let snippet = BoundedSnippet::new(&raw, limit);
                prop_assert!(snippet.source_chars() <= limit);
                prop_assert_eq!(snippet.is_truncated(), raw.chars().count() > limit);
                if snippet.is_truncated() {
                    prop_assert!(snippet.as_str().ends_with(TRUNCATION_MARKER));
                }
            }
        }
    }
}
