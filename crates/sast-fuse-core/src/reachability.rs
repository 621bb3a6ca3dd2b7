use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use aho_corasick::AhoCorasick;
use anyhow::Result;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::detect;
use crate::model::{Language, Reachability, Vulnerability};

/// Source trees larger than this are not worth a heuristic walk; the
/// verification stage treats the resulting `Unknown` as reachable anyway.
const MAX_FILES: usize = 256;
const MAX_WALK_DEPTH: usize = 12;

/// Advisory reachability oracle. Never removes a vulnerability; the verdict
/// only selects which verification prompt is used.
#[async_trait]
pub trait ReachabilityAnalyzer: Send + Sync {
    async fn analyze(&self, vulnerability: &Vulnerability, tree: &Path) -> Reachability;
}

/// In-process approximation of a call-graph reachability query: function
/// definitions are indexed per language, call sites found with one
/// multi-pattern scan, and entry points walked breadth-first toward the
/// sink's enclosing function. Anything this cannot model yields `Unknown`,
/// never an error.
pub struct HeuristicReachability {
    max_depth: usize,
}

impl HeuristicReachability {
    pub fn new() -> Self {
        Self {
            max_depth: MAX_WALK_DEPTH,
        }
    }

    fn try_analyze(&self, vulnerability: &Vulnerability, tree: &Path) -> Result<Reachability> {
        let sink_file = &vulnerability.primary.file;
        let Some(language) = language_of(sink_file) else {
            debug!(file = %sink_file.display(), "no language mapping, reachability unknown");
            return Ok(Reachability::Unknown);
        };

        let files = detect::files_by_language(tree, language)?;
        if files.is_empty() || files.len() > MAX_FILES {
            return Ok(Reachability::Unknown);
        }

        let mut functions: Vec<FunctionDef> = Vec::new();
        for file in &files {
            let Ok(content) = std::fs::read_to_string(file) else {
                continue;
            };
            functions.extend(index_functions(file, &content, language));
        }
        if functions.is_empty() {
            return Ok(Reachability::Unknown);
        }

        let Some(sink_idx) = functions.iter().position(|f| {
            paths_match(&f.file, sink_file) && f.contains_line(vulnerability.primary.line)
        }) else {
            return Ok(Reachability::Unknown);
        };

        let edges = call_edges(&functions)?;
        let entries: Vec<usize> = functions
            .iter()
            .enumerate()
            .filter(|(_, f)| is_entry_point(&f.name))
            .map(|(idx, _)| idx)
            .collect();
        if entries.is_empty() {
            // Nothing to walk from; cannot prove either direction.
            return Ok(Reachability::Unknown);
        }

        if let Some(path) = shortest_path(&edges, &entries, sink_idx, self.max_depth) {
            let names = path
                .into_iter()
                .map(|idx| functions[idx].name.clone())
                .collect();
            return Ok(Reachability::Reachable { path: names });
        }
        Ok(Reachability::Unreachable)
    }
}

impl Default for HeuristicReachability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReachabilityAnalyzer for HeuristicReachability {
    async fn analyze(&self, vulnerability: &Vulnerability, tree: &Path) -> Reachability {
        match self.try_analyze(vulnerability, tree) {
            Ok(reachability) => reachability,
            Err(err) => {
                warn!(
                    fingerprint = %vulnerability.fingerprint,
                    error = %err,
                    "reachability analysis failed, reporting unknown"
                );
                Reachability::Unknown
            }
        }
    }
}

struct FunctionDef {
    name: String,
    file: PathBuf,
    start_line: u32,
    end_line: u32,
    body: String,
}

impl FunctionDef {
    fn contains_line(&self, line: u32) -> bool {
        line >= self.start_line && line <= self.end_line
    }
}

static C_LIKE_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[A-Za-z_][A-Za-z0-9_:<>,\s\*&]*?\b([A-Za-z_][A-Za-z0-9_]*)\s*\([^;{}()]*\)\s*\{")
        .expect("static pattern")
});
static PYTHON_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*def\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("static pattern"));
static JS_DEF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)\bfunction\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*\(").expect("static pattern")
});

/// Index function definitions by start line; each body runs until the next
/// definition in the same file, a close-enough span for call-site scanning.
fn index_functions(file: &Path, content: &str, language: Language) -> Vec<FunctionDef> {
    let pattern: &Regex = match language {
        Language::C | Language::Cpp | Language::Java => &C_LIKE_DEF,
        Language::Python => &PYTHON_DEF,
        Language::JavaScript => &JS_DEF,
    };

    let mut starts: Vec<(usize, String)> = pattern
        .captures_iter(content)
        .filter_map(|caps| {
            let mat = caps.get(0)?;
            let name = caps.get(1)?.as_str().to_string();
            Some((mat.start(), name))
        })
        .collect();
    starts.sort_by_key(|(offset, _)| *offset);

    let line_of = |offset: usize| -> u32 {
        content[..offset].bytes().filter(|b| *b == b'\n').count() as u32 + 1
    };
    let total_lines = content.lines().count() as u32;

    let mut defs = Vec::new();
    for (idx, (offset, name)) in starts.iter().enumerate() {
        let start_line = line_of(*offset);
        let (end_offset, end_line) = match starts.get(idx + 1) {
            Some((next_offset, _)) => (*next_offset, line_of(*next_offset).saturating_sub(1)),
            None => (content.len(), total_lines),
        };
        defs.push(FunctionDef {
            name: name.clone(),
            file: file.to_path_buf(),
            start_line,
            end_line,
            body: content[*offset..end_offset].to_string(),
        });
    }
    defs
}

/// One automaton over `name(` patterns finds every call site in every body.
fn call_edges(functions: &[FunctionDef]) -> Result<Vec<Vec<usize>>> {
    let patterns: Vec<String> = functions.iter().map(|f| format!("{}(", f.name)).collect();
    let automaton = AhoCorasick::new(&patterns)?;

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); functions.len()];
    for (caller, def) in functions.iter().enumerate() {
        for mat in automaton.find_iter(&def.body) {
            let callee = mat.pattern().as_usize();
            if callee != caller && !edges[caller].contains(&callee) {
                edges[caller].push(callee);
            }
        }
    }
    Ok(edges)
}

fn is_entry_point(name: &str) -> bool {
    name == "main"
        || name.starts_with("handle")
        || name.starts_with("on_")
        || name.contains("request")
        || name.starts_with("api_")
}

fn shortest_path(
    edges: &[Vec<usize>],
    entries: &[usize],
    sink: usize,
    max_depth: usize,
) -> Option<Vec<usize>> {
    let mut predecessor: HashMap<usize, usize> = HashMap::new();
    let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
    for entry in entries {
        if *entry == sink {
            return Some(vec![sink]);
        }
        queue.push_back((*entry, 0));
    }
    let mut visited: Vec<bool> = vec![false; edges.len()];
    for entry in entries {
        visited[*entry] = true;
    }

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= max_depth {
            continue;
        }
        for next in &edges[node] {
            if visited[*next] {
                continue;
            }
            visited[*next] = true;
            predecessor.insert(*next, node);
            if *next == sink {
                let mut path = vec![sink];
                let mut cursor = sink;
                while let Some(prev) = predecessor.get(&cursor) {
                    path.push(*prev);
                    cursor = *prev;
                }
                path.reverse();
                return Some(path);
            }
            queue.push_back((*next, depth + 1));
        }
    }
    None
}

/// Tool-reported paths are relative to the project root while indexed files
/// are absolute; suffix comparison bridges the two.
fn paths_match(indexed: &Path, reported: &Path) -> bool {
    indexed == reported || indexed.ends_with(reported)
}

fn language_of(path: &Path) -> Option<Language> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Language::from_extension(&ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        BoundedSnippet, DefectCategory, Finding, Fingerprint, Severity, ToolKind,
        DEFAULT_SNIPPET_LIMIT,
    };
    use std::fs;
    use std::path::PathBuf;

    const REACHABLE_C: &str = r#"#include <string.h>

void copy_input(char *dst, const char *src) {
    strcpy(dst, src);
}

int main(int argc, char **argv) {
    char buf[16];
    copy_input(buf, argv[1]);
    return 0;
}
"#;

    const ORPHAN_C: &str = r#"#include <string.h>

void copy_input(char *dst, const char *src) {
    strcpy(dst, src);
}

void unused_helper(void) {
}

int main(void) {
    return 0;
}
"#;

    fn vuln_at(file: &str, line: u32) -> Vulnerability {
        let finding = Finding {
            tool: ToolKind::Semgrep,
            rule_id: "rules.insecure-strcpy".into(),
            rule_name: "Unbounded copy.".into(),
            file: PathBuf::from(file),
            line,
            column: None,
            severity: Severity::Error,
            message: "strcpy into fixed buffer".into(),
            snippet: BoundedSnippet::new("strcpy(dst, src);", DEFAULT_SNIPPET_LIMIT),
            raw_size: 100,
        };
        let fp = Fingerprint::new(&finding.file, line, DefectCategory::MemorySafety);
        Vulnerability::new(fp, finding, Vec::new(), DefectCategory::MemorySafety)
    }

    #[tokio::test]
    async fn sink_called_from_main_is_reachable() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("vuln.c"), REACHABLE_C).unwrap();

        let analyzer = HeuristicReachability::new();
        let verdict = analyzer.analyze(&vuln_at("vuln.c", 4), temp.path()).await;
        match verdict {
            Reachability::Reachable { path } => {
                assert_eq!(path, vec!["main".to_string(), "copy_input".to_string()]);
            }
            other => panic!("expected reachable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn uncalled_sink_is_unreachable() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("vuln.c"), ORPHAN_C).unwrap();

        let analyzer = HeuristicReachability::new();
        let verdict = analyzer.analyze(&vuln_at("vuln.c", 4), temp.path()).await;
        assert_eq!(verdict, Reachability::Unreachable);
    }

    #[tokio::test]
    async fn missing_sources_yield_unknown() {
        let temp = tempfile::tempdir().unwrap();
        let analyzer = HeuristicReachability::new();
        let verdict = analyzer.analyze(&vuln_at("vuln.c", 4), temp.path()).await;
        assert_eq!(verdict, Reachability::Unknown);
    }

    #[test]
    fn python_definitions_are_indexed() {
        let content = "def handler(request):\n    helper()\n\ndef helper():\n    pass\n";
        let defs = index_functions(Path::new("app.py"), content, Language::Python);
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "handler");
        assert_eq!(defs[0].start_line, 1);
        assert_eq!(defs[1].name, "helper");
    }
}
