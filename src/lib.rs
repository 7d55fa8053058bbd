//! goldpath command-line front end.
//!
//! Wires configuration, logging and metrics around the recorder and the replay engine. The
//! `goldpath` binary exposes `record`, `replay` and `config`; `goldpath-replay` is the CI entry
//! point whose exit status is the run verdict.

pub mod cli;
pub mod config;
pub mod metrics;

pub use config::GoldpathConfig;
