use clap::Subcommand;

use super::config::ConfigArgs;
use super::record::RecordArgs;
use super::replay::ReplayArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Record a Golden Session in a headful browser until Ctrl-C or the window is closed
    Record(RecordArgs),

    /// Replay a Golden Session and write the run summary and artifacts
    Replay(ReplayArgs),

    /// Inspect the resolved configuration
    Config(ConfigArgs),
}
