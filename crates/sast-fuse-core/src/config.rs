use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::{ToolKind, DEFAULT_SNIPPET_LIMIT};

/// Configuration for the LLM verification endpoint. The endpoint speaks the
/// OpenAI-compatible chat-completions API; local backends need no key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl LlmConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            model: "qwen2.5:7b".to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 2,
        }
    }
}

/// One configuration value, constructed at the boundary and passed into each
/// component. The core reads no argv and no environment; whoever builds this
/// value owns that parsing.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// `None` disables LLM verification; every confirmed vulnerability then
    /// receives a rule-based patch.
    pub llm: Option<LlmConfig>,
    pub reachability_enabled: bool,
    pub disabled_tools: Vec<ToolKind>,
    /// Character bound for finding snippets.
    pub snippet_limit: usize,
    /// Findings within this many lines of each other may merge into one
    /// vulnerability.
    pub line_tolerance: u32,
    /// Worker-pool bound for concurrent LLM verification requests.
    pub verify_concurrency: usize,
    /// Deadline per external analyzer invocation.
    pub tool_timeout: Duration,
}

impl PipelineConfig {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            llm: None,
            reachability_enabled: false,
            disabled_tools: Vec::new(),
            snippet_limit: DEFAULT_SNIPPET_LIMIT,
            line_tolerance: 2,
            verify_concurrency: 4,
            tool_timeout: Duration::from_secs(180),
        }
    }

    pub fn tool_enabled(&self, tool: ToolKind) -> bool {
        !self.disabled_tools.contains(&tool)
    }

    /// Fatal-path validation, run before any analysis work begins. Every
    /// other failure in the pipeline degrades locally; this one aborts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.input_dir.exists() {
            return Err(ConfigError::InputDirMissing {
                path: self.input_dir.clone(),
            });
        }
        if !self.input_dir.is_dir() {
            return Err(ConfigError::InputNotADirectory {
                path: self.input_dir.clone(),
            });
        }
        std::fs::create_dir_all(&self.output_dir).map_err(|source| {
            ConfigError::OutputDirUnusable {
                path: self.output_dir.clone(),
                source,
            }
        })?;
        if !self.output_dir.is_dir() {
            return Err(ConfigError::OutputDirNotADirectory {
                path: self.output_dir.clone(),
            });
        }
        if self.verify_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        if self.snippet_limit == 0 {
            return Err(ConfigError::InvalidSnippetLimit);
        }
        Ok(())
    }
}

/// Configuration errors are the only fatal errors in the pipeline.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("input directory {path} does not exist")]
    InputDirMissing { path: PathBuf },
    #[error("input path {path} is not a directory")]
    InputNotADirectory { path: PathBuf },
    #[error("output directory {path} cannot be created")]
    OutputDirUnusable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("output path {path} exists but is not a directory")]
    OutputDirNotADirectory { path: PathBuf },
    #[error("verification concurrency must be at least 1")]
    InvalidConcurrency,
    #[error("snippet limit must be at least 1 character")]
    InvalidSnippetLimit,
}
