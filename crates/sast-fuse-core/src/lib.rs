pub mod adapter;
pub mod aggregate;
pub mod config;
pub mod detect;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod reachability;
pub mod report;
pub mod verify;

pub use adapter::{RawOutput, ToolAdapter};
pub use aggregate::aggregate;
pub use config::{ConfigError, LlmConfig, PipelineConfig};
pub use model::{
    BoundedSnippet, DefectCategory, Finding, Fingerprint, Language, Patch, PatchSource,
    Reachability, Severity, ToolKind, Verdict, Vulnerability,
};
pub use pipeline::{run, run_with, PipelineSummary};
pub use reachability::{HeuristicReachability, ReachabilityAnalyzer};
pub use verify::{HttpLlmClient, LlmAssessment, LlmClient, VerificationEngine};
