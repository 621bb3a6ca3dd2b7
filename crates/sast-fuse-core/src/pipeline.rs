use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::adapter::{default_adapters, RawOutput, ToolAdapter};
use crate::aggregate::aggregate;
use crate::config::PipelineConfig;
use crate::detect::detect_languages;
use crate::model::{Language, ToolKind, Vulnerability};
use crate::normalize::normalize;
use crate::reachability::{HeuristicReachability, ReachabilityAnalyzer};
use crate::report::write_reports;
use crate::verify::{HttpLlmClient, LlmClient, VerificationEngine};

/// What one invocation produced, for callers that narrate progress.
#[derive(Debug)]
pub struct PipelineSummary {
    pub languages: BTreeSet<Language>,
    pub finding_count: usize,
    pub vulnerabilities: Vec<Vulnerability>,
    pub reports: Vec<PathBuf>,
    /// Tools that contributed raw output.
    pub tools_run: Vec<ToolKind>,
    /// Tools that were enabled but absent or failed.
    pub tools_skipped: Vec<ToolKind>,
}

/// Run the full pipeline with the default adapter set and, when configured,
/// the HTTP LLM client and the heuristic reachability analyzer.
pub async fn run(config: &PipelineConfig) -> Result<PipelineSummary> {
    let adapters = default_adapters(config);
    let llm: Option<Arc<dyn LlmClient>> = match &config.llm {
        Some(llm_config) => Some(Arc::new(
            HttpLlmClient::new(llm_config).context("invalid LLM configuration")?,
        )),
        None => None,
    };
    let reachability: Option<Arc<dyn ReachabilityAnalyzer>> = if config.reachability_enabled {
        Some(Arc::new(HeuristicReachability::new()))
    } else {
        None
    };
    run_with(config, adapters, llm, reachability).await
}

/// Run the pipeline with explicit collaborators. Ownership flows one way:
/// adapters produce raw output, the normalizer turns it into findings, the
/// aggregator into vulnerabilities, verification resolves them, the writer
/// serializes them. Only configuration problems abort; everything else
/// degrades to partial results.
#[instrument(name = "pipeline", skip_all, fields(input = %config.input_dir.display()))]
pub async fn run_with(
    config: &PipelineConfig,
    adapters: Vec<Arc<dyn ToolAdapter>>,
    llm: Option<Arc<dyn LlmClient>>,
    reachability: Option<Arc<dyn ReachabilityAnalyzer>>,
) -> Result<PipelineSummary> {
    config.validate()?;

    let languages = detect_languages(&config.input_dir)?;
    info!(?languages, "languages detected");

    let raw_outputs = run_adapters(config, &adapters, &languages).await;
    let mut tools_run: BTreeSet<ToolKind> = BTreeSet::new();
    let mut findings = Vec::new();
    for raw in &raw_outputs {
        tools_run.insert(raw.tool);
        findings.extend(normalize(raw, &config.input_dir, config.snippet_limit));
    }
    let finding_count = findings.len();
    info!(findings = finding_count, "findings normalized");

    let mut vulnerabilities = aggregate(findings, config.line_tolerance);
    info!(vulnerabilities = vulnerabilities.len(), "findings aggregated");

    if let Some(analyzer) = &reachability {
        for vulnerability in &mut vulnerabilities {
            let verdict = analyzer.analyze(vulnerability, &config.input_dir).await;
            vulnerability.reachability = Some(verdict);
        }
    }

    let engine = VerificationEngine::new(llm, config.verify_concurrency);
    let vulnerabilities = engine.verify_all(vulnerabilities, &config.input_dir).await;

    let reports = write_reports(&vulnerabilities, &config.output_dir)?;
    info!(reports = reports.len(), "reports written");

    let tools_skipped: Vec<ToolKind> = adapters
        .iter()
        .map(|a| a.tool())
        .filter(|t| !tools_run.contains(t))
        .collect();

    Ok(PipelineSummary {
        languages,
        finding_count,
        vulnerabilities,
        reports,
        tools_run: tools_run.into_iter().collect(),
        tools_skipped,
    })
}

/// Fan adapters out over the detected languages. Adapter failures of any
/// kind surface as absence; one tool's trouble never reaches its peers.
async fn run_adapters(
    config: &PipelineConfig,
    adapters: &[Arc<dyn ToolAdapter>],
    languages: &BTreeSet<Language>,
) -> Vec<RawOutput> {
    let mut tasks: JoinSet<Option<RawOutput>> = JoinSet::new();

    for adapter in adapters {
        let supported: Vec<Language> = languages
            .iter()
            .copied()
            .filter(|l| adapter.supports(*l))
            .collect();
        // Whole-tree scanners run once, per-language tools once per language.
        let invocations: Vec<Language> = if adapter.scans_whole_tree() {
            supported.into_iter().take(1).collect()
        } else {
            supported
        };

        for language in invocations {
            let adapter = adapter.clone();
            let tree = config.input_dir.clone();
            tasks.spawn(async move {
                if !adapter.probe().await {
                    warn!(tool = %adapter.tool(), "tool unavailable, continuing without it");
                    return None;
                }
                match adapter.run(&tree, language).await {
                    Ok(output) => output,
                    Err(err) => {
                        warn!(
                            tool = %adapter.tool(),
                            error = %err,
                            "tool execution failed, continuing without it"
                        );
                        None
                    }
                }
            });
        }
    }

    let mut outputs = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some(output)) => outputs.push(output),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "adapter task aborted, continuing without it"),
        }
    }
    outputs
}
