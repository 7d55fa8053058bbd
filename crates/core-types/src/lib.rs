//! Shared data model for goldpath.
//!
//! The recorder produces a [`GoldenSession`]; the replay engine consumes it and produces a
//! [`RunSummary`] plus [`Anomaly`] and [`CrashReport`] artifacts. Everything here is plain data
//! with a camelCase JSON wire format, because the files cross process boundaries into the
//! diagnosis and dispatch tooling.

pub mod action;
pub mod error_entry;
pub mod report;
pub mod session;

use thiserror::Error;
use uuid::Uuid;

pub use action::{
    Action, ActionKind, ActionPerformance, ActionType, ElementContext, FieldContext,
    NavigationContext, NavigationMethod, WaitCondition,
};
pub use error_entry::{ErrorEntry, Fingerprint};
pub use report::{
    is_degraded, Anomaly, ConsoleLine, CrashReport, FailureKind, PerformanceSummary, RunStatus,
    RunSummary, RunSummaryBuilder, StepFlag, StepResult, StepStatus, DEFAULT_DEGRADATION_FACTOR,
};
pub use session::{GoldenSession, SessionMetadata, Viewport};

/// Errors raised while loading or validating model files.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid golden session: {0}")]
    InvalidSession(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Generates a fresh random identifier for sessions and runs.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
