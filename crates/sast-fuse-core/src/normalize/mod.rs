use std::path::{Path, PathBuf};

use tracing::warn;

use crate::adapter::RawOutput;
use crate::model::{Finding, ToolKind};

mod bandit;
mod joern;
mod sarif;

/// Convert one adapter's raw payload into canonical findings.
///
/// Whatever the source tool, the output shape is identical; downstream
/// stages never special-case tool identity beyond the `tool` field. An
/// unparsable payload is logged and yields no findings, mirroring the
/// adapter's absence semantics rather than failing the pipeline.
pub fn normalize(raw: &RawOutput, project_root: &Path, snippet_limit: usize) -> Vec<Finding> {
    let result = match raw.tool {
        ToolKind::Semgrep | ToolKind::SpotBugs | ToolKind::CodeQl => {
            sarif::parse(raw.tool, &raw.payload, project_root, snippet_limit)
        }
        ToolKind::Bandit => bandit::parse(&raw.payload, project_root, snippet_limit),
        ToolKind::Joern => joern::parse(&raw.payload, project_root, snippet_limit),
    };

    match result {
        Ok(findings) => findings,
        Err(err) => {
            warn!(tool = %raw.tool, error = %err, "raw output could not be parsed, discarding");
            Vec::new()
        }
    }
}

/// Rebase a tool-reported path onto the project root so fingerprints are
/// stable across machines and invocation directories.
pub(crate) fn rebase(file: &str, project_root: &Path) -> PathBuf {
    let path = Path::new(file);
    match path.strip_prefix(project_root) {
        Ok(relative) => relative.to_path_buf(),
        Err(_) => path.to_path_buf(),
    }
}

/// First sentence of a possibly long rule description; long help text is
/// volume without verification value.
pub(crate) fn first_sentence(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.find(". ") {
        Some(idx) => trimmed[..idx + 1].to_string(),
        None => trimmed.trim_end_matches('.').to_string() + ".",
    }
}
