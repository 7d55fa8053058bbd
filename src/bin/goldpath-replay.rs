//! `goldpath-replay <SESSION>`: replay one Golden Session and exit 0 on PASS, 1 on FAIL or when
//! the run could not start.

use std::process::ExitCode;

use clap::Parser;
use goldpath_cli::cli::app::{bootstrap, finish};
use goldpath_cli::cli::env::GlobalArgs;
use goldpath_cli::cli::{cmd_replay, ReplayArgs};

#[derive(Parser)]
#[command(name = "goldpath-replay", author, version, about, long_about = None)]
struct ReplayCli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(flatten)]
    replay: ReplayArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = ReplayCli::parse();
    let outcome = match bootstrap(&cli.global).await {
        Ok((ctx, _log_guard)) => {
            let outcome = cmd_replay(cli.replay, &ctx).await;
            finish(&cli.global, outcome)
        }
        Err(err) => Err(err),
    };
    match outcome {
        Ok(code) => code,
        Err(err) => {
            eprintln!("goldpath-replay: {err:#}");
            ExitCode::FAILURE
        }
    }
}
