use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tempfile::TempDir;
use tracing::warn;

use super::process::{binary_on_path, run_tool, RunOutcome};
use super::{RawOutput, ToolAdapter};
use crate::detect;
use crate::model::{Language, ToolKind};

/// Runs CodeQL: database creation followed by the default query suite,
/// emitting SARIF into a scoped work directory.
///
/// Compiled languages need a build command for extraction; a minimal one is
/// synthesized per language when the tree has matching sources. Build
/// failures degrade to absence for this adapter only.
pub struct CodeqlAdapter {
    timeout: Duration,
}

impl CodeqlAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn query_language(language: Language) -> &'static str {
        match language {
            // CodeQL treats C and C++ as one extractor.
            Language::C | Language::Cpp => "cpp",
            Language::Java => "java",
            Language::Python => "python",
            Language::JavaScript => "javascript",
        }
    }

    /// Write a build script compiling each source file individually, so the
    /// extractor traces all of them without object-file collisions.
    fn synthesize_build_script(
        tree: &Path,
        language: Language,
        work_dir: &Path,
    ) -> Result<Option<std::path::PathBuf>> {
        let (files, compiler) = match language {
            Language::C => (detect::files_by_language(tree, Language::C)?, "gcc"),
            Language::Cpp => (detect::files_by_language(tree, Language::Cpp)?, "g++"),
            Language::Java => (detect::files_by_language(tree, Language::Java)?, "javac"),
            // Interpreted languages extract without a build.
            Language::Python | Language::JavaScript => return Ok(None),
        };
        if files.is_empty() {
            return Ok(None);
        }

        let mut script = String::from("#!/bin/sh\nset -e\n");
        match language {
            Language::Java => {
                for file in &files {
                    script.push_str(&format!("javac -d {} {}\n", work_dir.display(), file.display()));
                }
            }
            _ => {
                for (idx, file) in files.iter().enumerate() {
                    // Headers are traced through their includers.
                    if file.extension().and_then(|e| e.to_str()) == Some("h") {
                        continue;
                    }
                    script.push_str(&format!(
                        "{} -c {} -o {}/obj_{}.o\n",
                        compiler,
                        file.display(),
                        work_dir.display(),
                        idx
                    ));
                }
            }
        }

        let script_path = work_dir.join("build.sh");
        std::fs::write(&script_path, script).context("failed to write codeql build script")?;
        let mut perms = std::fs::metadata(&script_path)
            .context("failed to stat codeql build script")?
            .permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script_path, perms)
            .context("failed to mark codeql build script executable")?;
        Ok(Some(script_path))
    }
}

#[async_trait]
impl ToolAdapter for CodeqlAdapter {
    fn tool(&self) -> ToolKind {
        ToolKind::CodeQl
    }

    fn supports(&self, _language: Language) -> bool {
        true
    }

    async fn probe(&self) -> bool {
        binary_on_path("codeql").is_some()
    }

    async fn run(&self, tree: &Path, language: Language) -> Result<Option<RawOutput>> {
        let Some(binary) = binary_on_path("codeql") else {
            warn!(tool = "codeql", "binary not found on PATH, skipping");
            return Ok(None);
        };

        let work_dir = TempDir::new().context("failed to create codeql work directory")?;
        let db_path = work_dir.path().join("db");
        let db_arg = db_path.to_string_lossy().into_owned();
        let lang_arg = format!("--language={}", Self::query_language(language));
        let source_arg = format!("--source-root={}", tree.display());

        let mut create_args: Vec<String> = vec![
            "database".into(),
            "create".into(),
            db_arg.clone(),
            lang_arg,
            source_arg,
            "--overwrite".into(),
        ];
        if let Some(script) = Self::synthesize_build_script(tree, language, work_dir.path())? {
            create_args.push(format!("--command={}", script.display()));
        }
        let create_refs: Vec<&str> = create_args.iter().map(String::as_str).collect();

        match run_tool(&binary, &create_refs, tree, self.timeout).await? {
            RunOutcome::Completed(output) if output.exited_with(&[0]) => {}
            RunOutcome::Completed(output) => {
                warn!(
                    tool = "codeql",
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "database creation failed, skipping"
                );
                return Ok(None);
            }
            RunOutcome::TimedOut => {
                warn!(tool = "codeql", "database creation timed out, skipping");
                return Ok(None);
            }
        }

        let results_path = work_dir.path().join("results.sarif");
        let results_arg = results_path.to_string_lossy().into_owned();
        let analyze_args = [
            "database",
            "analyze",
            db_arg.as_str(),
            "--format=sarif-latest",
            "--output",
            results_arg.as_str(),
        ];

        match run_tool(&binary, &analyze_args, tree, self.timeout).await? {
            RunOutcome::Completed(output) if output.exited_with(&[0]) => {}
            RunOutcome::Completed(output) => {
                warn!(
                    tool = "codeql",
                    exit_code = ?output.exit_code,
                    stderr = %output.stderr.trim(),
                    "analysis failed, skipping"
                );
                return Ok(None);
            }
            RunOutcome::TimedOut => {
                warn!(tool = "codeql", "analysis timed out, skipping");
                return Ok(None);
            }
        }

        match std::fs::read_to_string(&results_path) {
            Ok(payload) if !payload.trim().is_empty() => {
                Ok(Some(RawOutput::new(ToolKind::CodeQl, payload)))
            }
            Ok(_) => {
                warn!(tool = "codeql", "results file was empty, skipping");
                Ok(None)
            }
            Err(err) => {
                warn!(tool = "codeql", error = %err, "no results file produced, skipping");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn build_script_covers_c_sources_but_not_headers() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.c"), "int main() { return 0; }").unwrap();
        fs::write(temp.path().join("a.h"), "int f(void);").unwrap();
        let work = tempfile::tempdir().unwrap();

        let script = CodeqlAdapter::synthesize_build_script(temp.path(), Language::C, work.path())
            .unwrap()
            .expect("c sources should produce a build script");
        let body = fs::read_to_string(script).unwrap();
        assert!(body.contains("gcc -c"));
        assert!(body.contains("a.c"));
        assert!(!body.contains("a.h "));
    }

    #[test]
    fn interpreted_languages_need_no_build_script() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("app.py"), "pass").unwrap();
        let work = tempfile::tempdir().unwrap();

        let script =
            CodeqlAdapter::synthesize_build_script(temp.path(), Language::Python, work.path())
                .unwrap();
        assert!(script.is_none());
    }
}
