use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use cdp_adapter::Cdp;
use clap::Args;
use serde_json::json;
use session_recorder::SessionRecorder;
use tokio::signal;
use tracing::{info, warn};

use crate::cli::context::CliContext;
use crate::cli::output::OutputFormat;

#[derive(Args, Clone, Debug)]
pub struct RecordArgs {
    /// Start URL
    pub url: Option<String>,

    /// Recording output directory
    #[arg(short = 'O', long)]
    pub output_dir: Option<PathBuf>,

    /// Run the browser headless (recording normally needs a visible window)
    #[arg(long)]
    pub headless: bool,
}

pub async fn cmd_record(args: RecordArgs, ctx: &CliContext) -> Result<()> {
    let mut config = ctx.config().recorder_config();
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }

    let adapter = ctx.launch_browser(Some(args.headless)).await?;
    let cdp: Arc<dyn Cdp> = adapter.clone();
    let recorder = SessionRecorder::start(cdp, config, args.url.clone())
        .await
        .context("failed to start recording")?;

    if ctx.output() == OutputFormat::Human {
        println!(
            "Recording session {} ... interact with the browser, press Ctrl-C or close the window to finish",
            recorder.session_id()
        );
    }

    tokio::select! {
        interrupted = signal::ctrl_c() => match interrupted {
            Ok(()) => info!("interrupt received; stopping recording"),
            Err(err) => warn!(?err, "failed to listen for Ctrl-C; stopping recording"),
        },
        _ = recorder.wait_closed() => info!("browser closed; stopping recording"),
    }

    let stopped = recorder.stop().await;
    adapter.shutdown().await;
    let path = stopped.context("failed to export the golden session")?;

    match ctx.output() {
        OutputFormat::Human => {
            println!(
                "Golden Session saved: {} ({} actions, {} distinct errors)",
                path.display(),
                recorder.action_count(),
                recorder.error_count()
            );
        }
        OutputFormat::Json => {
            let summary = json!({
                "sessionId": recorder.session_id(),
                "path": path,
                "actionCount": recorder.action_count(),
                "errorCount": recorder.error_count(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}
