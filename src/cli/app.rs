use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::{CliArgs, GlobalArgs};
use super::runtime::{init_logging, load_config, load_local_env_overrides, LoadedConfig};
use crate::metrics;

/// Entry point of the `goldpath` binary.
pub async fn run() -> Result<ExitCode> {
    let cli = CliArgs::parse();
    let (ctx, _log_guard) = bootstrap(&cli.global).await?;

    let outcome = dispatch(cli.command, &ctx).await;
    finish(&cli.global, outcome)
}

/// Environment overrides, config, logging and metrics, in that order: the log level may come
/// from the config file.
pub async fn bootstrap(
    global: &GlobalArgs,
) -> Result<(CliContext, Option<tracing_appender::non_blocking::WorkerGuard>)> {
    load_local_env_overrides();
    let LoadedConfig { config, path } = load_config(global.config.as_ref()).await?;

    let level = global
        .log_level
        .clone()
        .or_else(|| config.logging.level.clone())
        .unwrap_or_else(|| "info".to_string());
    let guard = init_logging(
        &level,
        global.debug,
        config.logging.json,
        config.logging.file.as_deref(),
    )?;
    metrics::register_metrics();

    info!(
        "Starting goldpath v{} ({}, built {})",
        env!("CARGO_PKG_VERSION"),
        env!("GOLDPATH_GIT_HASH"),
        env!("GOLDPATH_BUILD_DATE")
    );
    info!(config = %path.display(), "configuration resolved");
    Ok((CliContext::new(config, path, global.output), guard))
}

pub fn finish(global: &GlobalArgs, outcome: Result<ExitCode>) -> Result<ExitCode> {
    if let Some(path) = &global.metrics_out {
        if let Err(err) = metrics::write_text(path) {
            error!(path = %path.display(), %err, "failed to write metrics");
        }
    }
    match outcome {
        Ok(code) => {
            info!("Command completed");
            Ok(code)
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
