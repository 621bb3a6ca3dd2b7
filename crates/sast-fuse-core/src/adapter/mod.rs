use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::PipelineConfig;
use crate::model::{Language, ToolKind};

mod bandit;
mod codeql;
mod joern;
pub mod process;
mod semgrep;
mod spotbugs;

pub use bandit::BanditAdapter;
pub use codeql::CodeqlAdapter;
pub use joern::JoernAdapter;
pub use semgrep::SemgrepAdapter;
pub use spotbugs::SpotbugsAdapter;

/// Raw, unparsed payload captured from one analyzer invocation.
#[derive(Debug, Clone)]
pub struct RawOutput {
    pub tool: ToolKind,
    pub payload: String,
}

impl RawOutput {
    pub fn new(tool: ToolKind, payload: String) -> Self {
        Self { tool, payload }
    }
}

/// Uniform wrapper around one external analyzer.
///
/// `run` returns `Ok(None)` for every locally recovered failure: tool not
/// installed, timeout, non-zero exit without output. Adapters never turn
/// their own failure into a pipeline failure.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn tool(&self) -> ToolKind;

    fn supports(&self, language: Language) -> bool;

    /// One invocation covers the whole tree regardless of language; the
    /// pipeline then runs it once instead of once per language.
    fn scans_whole_tree(&self) -> bool {
        false
    }

    /// Check whether the backing binary/service is present without
    /// invoking it.
    async fn probe(&self) -> bool;

    async fn run(&self, tree: &Path, language: Language) -> Result<Option<RawOutput>>;
}

/// Default adapter set for a pipeline run, honoring disabled-tool config.
pub fn default_adapters(config: &PipelineConfig) -> Vec<Arc<dyn ToolAdapter>> {
    let timeout = config.tool_timeout;
    let all: Vec<Arc<dyn ToolAdapter>> = vec![
        Arc::new(CodeqlAdapter::new(timeout)),
        Arc::new(JoernAdapter::new(timeout)),
        Arc::new(SpotbugsAdapter::new(timeout)),
        Arc::new(BanditAdapter::new(timeout)),
        Arc::new(SemgrepAdapter::new(timeout)),
    ];
    all.into_iter()
        .filter(|adapter| config.tool_enabled(adapter.tool()))
        .collect()
}
