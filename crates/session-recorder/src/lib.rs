//! Golden Session recorder.
//!
//! Consumes the capture agent's binding payloads and the adapter's console and network events,
//! numbers accepted actions, collapses repeated problems by fingerprint and exports the frozen
//! session as JSON when recording stops.

pub mod config;
pub mod dedup;
pub mod log;
pub mod recorder;

use capture_agent::CaptureError;
use cdp_adapter::AdapterError;
use goldpath_core_types::ModelError;
use thiserror::Error;

pub use config::RecorderConfig;
pub use dedup::ErrorDeduper;
pub use log::ActionLog;
pub use recorder::SessionRecorder;

#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("browser setup failed: {0}")]
    Adapter(#[from] AdapterError),
    #[error("agent setup failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("failed to serialize session: {0}")]
    Model(#[from] ModelError),
    #[error("failed to write session: {0}")]
    Io(#[from] std::io::Error),
}
