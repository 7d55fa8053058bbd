//! Replay error taxonomy.
//!
//! Only [`ReplayError::FatalLaunch`] and failures to read the Golden Session leave
//! [`crate::ReplayEngine::run`]; everything else is folded into step results or logged.

use cdp_adapter::{AdapterError, AdapterErrorKind};
use goldpath_core_types::{FailureKind, ModelError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    /// The step's action could not be performed. Fatal to the step only.
    #[error("step {step} failed: {message}")]
    Dispatch {
        step: u64,
        kind: FailureKind,
        message: String,
    },
    /// The recorded wait condition was not observed in time. Not a failure.
    #[error("step {step} did not settle on {condition} within {timeout_ms}ms")]
    WaitTimeout {
        step: u64,
        condition: String,
        timeout_ms: u64,
    },
    /// An artifact (trace, screenshot, archive) could not be captured or stored.
    #[error("artifact capture failed: {0}")]
    Transport(String),
    #[error("browser failed to start: {0}")]
    FatalLaunch(#[source] AdapterError),
    #[error("invalid golden session: {0}")]
    Session(#[from] ModelError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl ReplayError {
    pub(crate) fn dispatch(step: u64, kind: FailureKind, message: impl Into<String>) -> Self {
        ReplayError::Dispatch {
            step,
            kind,
            message: message.into(),
        }
    }

    /// Classify an adapter failure raised while dispatching `step`.
    pub(crate) fn from_adapter(step: u64, err: &AdapterError) -> Self {
        let kind = match err.kind {
            AdapterErrorKind::TargetNotFound => FailureKind::SelectorNotFound,
            AdapterErrorKind::Timeout => FailureKind::Timeout,
            _ => FailureKind::DispatchFailed,
        };
        Self::dispatch(step, kind, err.to_string())
    }

    pub(crate) fn transport(err: impl std::fmt::Display) -> Self {
        ReplayError::Transport(err.to_string())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ReplayError::FatalLaunch(_) | ReplayError::Session(_))
    }
}

impl From<zip::result::ZipError> for ReplayError {
    fn from(err: zip::result::ZipError) -> Self {
        ReplayError::transport(err)
    }
}
