use anyhow::{Context, Result};
use clap::Parser;
use patchpilot::config::Config;
use patchpilot::env::{repo_scope_builder, run_episode, Environment, EnvironmentConfig};
use patchpilot::episode::EpisodeContext;
use patchpilot::pattern::{CallExpressionPattern, MethodInvocationPattern, Pattern};
use patchpilot::policy::{HttpCompletionClient, LlmPolicy, Policy, SymbolEraserPolicy};
use patchpilot::tools::{DefinitionExtractor, GrepLocator, Tool};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "patchpilot",
    about = "Crash-report triage and LLM-driven patch proposal",
    version
)]
struct Args {
    /// Path to the crash report to analyze
    crash_log: PathBuf,

    /// Path to the repository the crash came from (defaults to current directory)
    #[arg(short, long, default_value = ".")]
    repo: PathBuf,

    /// Per-episode step cap (overrides config)
    #[arg(short, long)]
    steps: Option<usize>,

    /// Fan-out worker count (overrides config; default: all available)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Model id to request completions from (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Only extract the vulnerability-relevant symbols, then stop
    #[arg(long)]
    extract_only: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load();

    let crash_text = std::fs::read_to_string(&args.crash_log)
        .with_context(|| format!("failed to read crash log '{}'", args.crash_log.display()))?;
    let repo_root = args
        .repo
        .canonicalize()
        .with_context(|| format!("failed to resolve repository '{}'", args.repo.display()))?;

    let api_key = config.api_key().context(
        "no API key configured; set PATCHPILOT_API_KEY or add api_key to the config file",
    )?;
    let model = args.model.unwrap_or_else(|| config.model.clone());
    let client = Arc::new(HttpCompletionClient::new(
        api_key,
        model,
        Duration::from_secs(config.completion_timeout_secs),
    )?);

    let policy: Box<dyn Policy> = if args.extract_only {
        Box::new(SymbolEraserPolicy::new(client))
    } else {
        Box::new(LlmPolicy::new(client))
    };

    let locator = Arc::new(GrepLocator::new(Duration::from_secs(config.tool_timeout_secs)));
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(DefinitionExtractor::with_locator(locator))];

    let patterns: Vec<Arc<dyn Pattern>> = match config.pattern_limit {
        Some(limit) => vec![
            Arc::new(CallExpressionPattern::with_limit(limit)),
            Arc::new(MethodInvocationPattern::with_limit(limit)),
        ],
        None => vec![
            Arc::new(CallExpressionPattern::new()),
            Arc::new(MethodInvocationPattern::new()),
        ],
    };

    let mut env = Environment::new(
        tools,
        patterns,
        repo_scope_builder(),
        EnvironmentConfig {
            episode_length: args.steps.unwrap_or(config.episode_length),
            workers: args.workers.or(config.workers),
        },
    )?;

    let ctx = EpisodeContext::new(crash_text, repo_root);
    eprintln!("Analyzing crash report ({})...", ctx.run_id);

    let report = run_episode(&mut env, policy.as_ref(), &ctx)?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.policy_failure.is_some() {
        std::process::exit(1);
    }
    Ok(())
}
