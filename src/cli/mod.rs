pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod output;
pub mod record;
pub mod replay;
pub mod runtime;

pub use app::run;
pub use record::{cmd_record, RecordArgs};
pub use replay::{cmd_replay, run_replay, ReplayArgs};
