use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::model::Language;

/// Detect the programming languages present in a source tree by extension.
pub fn detect_languages(project_dir: &Path) -> Result<BTreeSet<Language>> {
    let mut languages = BTreeSet::new();
    walk(project_dir, &mut |path| {
        if let Some(lang) = language_of(path) {
            if languages.insert(lang) {
                debug!(file = %path.display(), language = %lang, "language detected");
            }
        }
    })
    .with_context(|| format!("failed to walk source tree at {}", project_dir.display()))?;

    if languages.is_empty() {
        warn!(dir = %project_dir.display(), "no supported source languages found");
    }
    Ok(languages)
}

/// All source files of one language under the tree.
pub fn files_by_language(project_dir: &Path, language: Language) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk(project_dir, &mut |path| {
        if language_of(path) == Some(language) {
            files.push(path.to_path_buf());
        }
    })
    .with_context(|| format!("failed to walk source tree at {}", project_dir.display()))?;
    files.sort();
    Ok(files)
}

fn language_of(path: &Path) -> Option<Language> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Language::from_extension(&ext)
}

fn walk(dir: &Path, visit: &mut dyn FnMut(&Path)) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            // Hidden directories (.git, .codeql) carry no analyzable source.
            let hidden = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('.'))
                .unwrap_or(false);
            if !hidden {
                walk(&path, visit)?;
            }
        } else if file_type.is_file() {
            visit(&path);
        }
    }
    Ok(())
}
