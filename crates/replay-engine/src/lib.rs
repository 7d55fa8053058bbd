//! Golden Session replay engine.
//!
//! `LAUNCH -> NAVIGATE(start) -> [EXECUTE(step) -> SETTLE(step)]* -> FINALIZE`. Each step is
//! dispatched by type, its recorded wait condition is honored without failing the step, and its
//! latency is compared against the recorded gap. Failing steps produce a screenshot, a crash report
//! and (once per run) a stopped execution trace, and the run continues with the next step.

pub mod artifacts;
pub mod config;
pub mod console;
mod dispatch;
pub mod engine;
pub mod error;
pub mod har;
pub mod observer;
pub mod repair;
pub mod session;
pub mod trace;
mod wait;

pub use artifacts::ArtifactLayout;
pub use config::ReplayConfig;
pub use engine::{ReplayEngine, RunReport};
pub use error::ReplayError;
pub use session::{load_session, parse_session};
