use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use sast_fuse_core::adapter::{
    BanditAdapter, CodeqlAdapter, JoernAdapter, SemgrepAdapter, SpotbugsAdapter, ToolAdapter,
};
use sast_fuse_core::{LlmConfig, PipelineConfig, ToolKind};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "sast-fuse",
    author,
    version,
    about = "Multi-tool SAST aggregation with LLM-assisted verification and patching"
)]
struct Cli {
    /// Project source directory to analyze
    #[arg(short = 'i', long = "input-dir", value_name = "DIR")]
    input_dir: Option<PathBuf>,

    /// Directory receiving one SARIF report per source file
    #[arg(short = 'o', long = "output-dir", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Enable LLM verification (env: SAST_FUSE_ENABLE_LLM)
    #[arg(long)]
    enable_llm: bool,

    /// LLM endpoint base URL, e.g. http://localhost:11434 (env: SAST_FUSE_LLM_URL)
    #[arg(long, value_name = "URL")]
    llm_url: Option<String>,

    /// LLM API key, if the endpoint needs one (env: SAST_FUSE_LLM_KEY)
    #[arg(long, value_name = "KEY")]
    llm_key: Option<String>,

    /// Model requested from the endpoint (env: SAST_FUSE_LLM_MODEL)
    #[arg(long, value_name = "MODEL")]
    llm_model: Option<String>,

    /// Enable the auxiliary reachability analysis (env: SAST_FUSE_ENABLE_REACHABILITY)
    #[arg(long)]
    enable_reachability: bool,

    /// Disable one analyzer; repeatable (env: SAST_FUSE_DISABLE_TOOLS, comma-separated)
    #[arg(long = "disable-tool", value_name = "TOOL")]
    disable_tools: Vec<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Probe which analyzers are available on this machine
    Tools {
        /// Emit availability as JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match &cli.command {
        Some(Commands::Tools { json }) => list_tools(*json).await,
        None => scan(&cli).await,
    }
}

async fn scan(cli: &Cli) -> Result<()> {
    let config = build_config(cli)?;

    println!("Analyzing {}", config.input_dir.display());
    match &config.llm {
        Some(llm) => println!("LLM verification enabled ({})", llm.base_url),
        None => println!("LLM verification disabled; rule-based patches only"),
    }

    let summary = sast_fuse_core::run(&config).await?;

    let languages: Vec<String> = summary.languages.iter().map(|l| l.to_string()).collect();
    if languages.is_empty() {
        println!("No supported source languages found");
    } else {
        println!("Languages: {}", languages.join(", "));
    }
    println!(
        "{} finding(s) aggregated into {} vulnerability(ies)",
        summary.finding_count,
        summary.vulnerabilities.len()
    );
    if !summary.tools_skipped.is_empty() {
        let skipped: Vec<String> = summary.tools_skipped.iter().map(|t| t.to_string()).collect();
        println!("Unavailable tools: {}", skipped.join(", "));
    }
    println!("{} report(s) written to {}", summary.reports.len(), config.output_dir.display());
    for report in &summary.reports {
        println!("  - {}", report.display());
    }
    Ok(())
}

/// Merge CLI flags over `SAST_FUSE_*` environment defaults into the one
/// configuration value the core consumes. Flags win over the environment.
fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let (Some(input_dir), Some(output_dir)) = (&cli.input_dir, &cli.output_dir) else {
        bail!("--input-dir and --output-dir are required");
    };
    let mut config = PipelineConfig::new(input_dir, output_dir);

    if cli.enable_llm || env_flag("SAST_FUSE_ENABLE_LLM") {
        let Some(url) = cli.llm_url.clone().or_else(|| env_value("SAST_FUSE_LLM_URL")) else {
            bail!("--enable-llm requires --llm-url or SAST_FUSE_LLM_URL");
        };
        let mut llm = LlmConfig::new(url);
        llm.api_key = cli.llm_key.clone().or_else(|| env_value("SAST_FUSE_LLM_KEY"));
        if let Some(model) = cli.llm_model.clone().or_else(|| env_value("SAST_FUSE_LLM_MODEL")) {
            llm.model = model;
        }
        config.llm = Some(llm);
    }

    config.reachability_enabled =
        cli.enable_reachability || env_flag("SAST_FUSE_ENABLE_REACHABILITY");

    let mut disabled = cli.disable_tools.clone();
    if disabled.is_empty() {
        if let Some(list) = env_value("SAST_FUSE_DISABLE_TOOLS") {
            disabled = list
                .split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect();
        }
    }
    for name in &disabled {
        config.disabled_tools.push(parse_tool(name)?);
    }

    Ok(config)
}

fn parse_tool(name: &str) -> Result<ToolKind> {
    let needle = name.trim().to_ascii_lowercase();
    match ToolKind::ALL.iter().find(|tool| tool.as_str() == needle) {
        Some(tool) => Ok(*tool),
        None => {
            let known: Vec<&str> = ToolKind::ALL.iter().map(|t| t.as_str()).collect();
            bail!("unknown tool `{name}`; known tools: {}", known.join(", "));
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_flag(key: &str) -> bool {
    env_value(key)
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

async fn list_tools(json: bool) -> Result<()> {
    // Probing only checks binary presence; the timeout is never exercised.
    let timeout = Duration::from_secs(1);
    let adapters: Vec<Box<dyn ToolAdapter>> = vec![
        Box::new(CodeqlAdapter::new(timeout)),
        Box::new(JoernAdapter::new(timeout)),
        Box::new(SpotbugsAdapter::new(timeout)),
        Box::new(BanditAdapter::new(timeout)),
        Box::new(SemgrepAdapter::new(timeout)),
    ];

    let mut rows = Vec::new();
    for adapter in &adapters {
        rows.push((adapter.tool(), adapter.probe().await));
    }

    if json {
        let doc: Vec<serde_json::Value> = rows
            .iter()
            .map(|(tool, available)| {
                serde_json::json!({"tool": tool.to_string(), "available": available})
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("{} analyzer(s) known", rows.len());
    for (tool, available) in rows {
        let status = if available { "available" } else { "not found" };
        println!("- {tool:<10} {status}", tool = tool.to_string());
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug,hyper=info,reqwest=info" } else { "info,tokio=warn" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}
