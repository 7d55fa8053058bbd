use std::process::ExitCode;

use anyhow::Result;

use super::config::cmd_config;
use super::record::cmd_record;
use super::replay::cmd_replay;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;

pub async fn dispatch(command: Commands, ctx: &CliContext) -> Result<ExitCode> {
    match command {
        Commands::Record(args) => cmd_record(args, ctx).await.map(|()| ExitCode::SUCCESS),
        Commands::Replay(args) => cmd_replay(args, ctx).await,
        Commands::Config(args) => cmd_config(args, ctx).await.map(|()| ExitCode::SUCCESS),
    }
}
