use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, warn};

pub mod fallback;
mod llm;
pub mod prompt;

pub use llm::{HttpLlmClient, LlmAssessment, LlmClient};

use crate::model::{Patch, PatchSource, Vulnerability};

/// Drives the per-vulnerability verification state machine:
/// `Unverified → {Confirmed+Patch, Rejected}` via the LLM, with
/// `LLMUnavailable → rule-based fallback` on any isolated failure.
///
/// Requests are dispatched with bounded concurrency; one request's failure
/// or timeout never cancels its siblings, and tasks share nothing beyond
/// the admission semaphore.
pub struct VerificationEngine {
    llm: Option<Arc<dyn LlmClient>>,
    concurrency: usize,
}

impl VerificationEngine {
    pub fn new(llm: Option<Arc<dyn LlmClient>>, concurrency: usize) -> Self {
        Self {
            llm,
            concurrency: concurrency.max(1),
        }
    }

    /// Verify every vulnerability, preserving input order in the output.
    #[instrument(name = "verify_all", skip_all, fields(count = vulnerabilities.len()))]
    pub async fn verify_all(
        &self,
        vulnerabilities: Vec<Vulnerability>,
        source_root: &Path,
    ) -> Vec<Vulnerability> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (idx, mut vulnerability) in vulnerabilities.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let llm = self.llm.clone();
            let root: PathBuf = source_root.to_path_buf();
            tasks.spawn(async move {
                // A closed semaphore cannot happen here; degrade to running
                // without a permit rather than dying.
                let _permit = semaphore.acquire_owned().await.ok();
                verify_one(&mut vulnerability, llm.as_deref(), &root).await;
                (idx, vulnerability)
            });
        }

        let mut resolved: Vec<(usize, Vulnerability)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => resolved.push(entry),
                Err(err) => error!(error = %err, "verification task aborted"),
            }
        }
        resolved.sort_by_key(|(idx, _)| *idx);
        resolved.into_iter().map(|(_, v)| v).collect()
    }
}

async fn verify_one(
    vulnerability: &mut Vulnerability,
    llm: Option<&dyn LlmClient>,
    source_root: &Path,
) {
    let source_path = if vulnerability.primary.file.is_absolute() {
        vulnerability.primary.file.clone()
    } else {
        source_root.join(&vulnerability.primary.file)
    };
    let source = tokio::fs::read_to_string(&source_path).await.ok();

    let original_line = source
        .as_deref()
        .and_then(|s| s.lines().nth(vulnerability.primary.line.saturating_sub(1) as usize))
        .unwrap_or_else(|| vulnerability.primary.snippet.as_str())
        .to_string();
    let code_context = source
        .as_deref()
        .map(|s| prompt::code_context(s, vulnerability.primary.line))
        .unwrap_or_else(|| vulnerability.primary.snippet.as_str().to_string());

    let outcome = match llm {
        Some(client) => match client.verify(vulnerability, &code_context).await {
            Ok(assessment) if !assessment.is_valid => {
                debug!(fingerprint = %vulnerability.fingerprint, "LLM rejected finding");
                Outcome::Reject
            }
            Ok(assessment) => match assessment.patch_code.filter(|p| !p.trim().is_empty()) {
                Some(patched_line) => Outcome::Confirm(Patch {
                    original_line: original_line.clone(),
                    patched_line,
                    explanation: assessment.explanation,
                    confidence: assessment.confidence.clamp(0.0, 1.0),
                    source: PatchSource::Llm,
                }),
                None => {
                    warn!(
                        fingerprint = %vulnerability.fingerprint,
                        "LLM confirmed without a patch, using rule-based fallback"
                    );
                    Outcome::Fallback
                }
            },
            Err(err) => {
                warn!(
                    fingerprint = %vulnerability.fingerprint,
                    error = %err,
                    "LLM unavailable for this vulnerability, using rule-based fallback"
                );
                Outcome::Fallback
            }
        },
        None => Outcome::Fallback,
    };

    let result = match outcome {
        Outcome::Reject => vulnerability.reject(),
        Outcome::Confirm(patch) => vulnerability.confirm(patch),
        Outcome::Fallback => {
            let patch = fallback::generate(
                vulnerability.category,
                &vulnerability.primary.rule_id,
                &original_line,
            );
            vulnerability.confirm(patch)
        }
    };
    if let Err(err) = result {
        error!(error = %err, "verdict transition refused");
    }
}

enum Outcome {
    Confirm(Patch),
    Reject,
    Fallback,
}
