use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use cdp_adapter::Cdp;
use clap::Args;
use replay_engine::{load_session, ReplayEngine, RunReport};
use tracing::info;

use crate::cli::context::CliContext;
use crate::cli::output::OutputFormat;
use crate::metrics;

#[derive(Args, Clone, Debug)]
pub struct ReplayArgs {
    /// Golden Session file produced by `goldpath record`
    pub session: PathBuf,

    /// Directory for the run summary and failure artifacts
    #[arg(short, long)]
    pub artifacts_dir: Option<PathBuf>,

    /// Show the browser window while replaying
    #[arg(long)]
    pub headful: bool,
}

/// PASS exits 0, FAIL exits 1. Errors before the first step propagate.
pub async fn cmd_replay(args: ReplayArgs, ctx: &CliContext) -> Result<ExitCode> {
    let report = run_replay(&args, ctx).await?;
    print_report(&report, ctx.output())?;
    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub async fn run_replay(args: &ReplayArgs, ctx: &CliContext) -> Result<RunReport> {
    let session = load_session(&args.session)
        .await
        .with_context(|| format!("failed to load golden session {}", args.session.display()))?;

    let mut config = ctx.config().replay_config();
    if let Some(dir) = &args.artifacts_dir {
        config.artifacts_dir = dir.clone();
    }

    let headless = if args.headful { Some(false) } else { None };
    let adapter = ctx.launch_browser(headless).await?;
    let cdp: Arc<dyn Cdp> = adapter.clone();
    let engine = ReplayEngine::new(cdp, config);
    let outcome = engine.run(&session).await;
    adapter.shutdown().await;

    let report = outcome.context("replay aborted")?;
    metrics::record_run(&report.summary);
    info!(
        status = if report.passed() { "PASS" } else { "FAIL" },
        artifacts = %report.artifacts.root().display(),
        "replay complete"
    );
    Ok(report)
}

fn print_report(report: &RunReport, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Human => {
            for step in &report.summary.steps {
                let marker = if step.is_failure() {
                    "FAIL"
                } else if step.degradation {
                    "SLOW"
                } else {
                    "ok  "
                };
                println!(
                    "  [{marker}] step {:>3} {:<10} {:>6}ms  {}",
                    step.step,
                    step.action_type,
                    step.latency,
                    step.selector.as_deref().unwrap_or("-")
                );
                if let Some(error) = &step.error {
                    println!("         {error}");
                }
                if let Some(suggestion) = &step.suggested_selector {
                    println!("         suggested selector: {suggestion}");
                }
            }
            if let Some(path) = &report.summary_path {
                println!("Run summary: {}", path.display());
            }
            if let Some(path) = &report.crash_report {
                println!("Crash report: {}", path.display());
            }
            if let Some(path) = &report.trace {
                println!("Trace: {}", path.display());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report.summary)?);
        }
    }
    println!("{}", report.one_line());
    Ok(())
}
