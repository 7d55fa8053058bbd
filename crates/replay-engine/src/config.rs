use std::path::PathBuf;
use std::time::Duration;

use goldpath_core_types::DEFAULT_DEGRADATION_FACTOR;
use selector_synth::SelectorPolicy;
use serde::{Deserialize, Serialize};

/// Replay settings. Loaded from the `replay` section of the goldpath config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReplayConfig {
    pub artifacts_dir: PathBuf,
    /// Bound on a single dispatched action.
    pub action_timeout_ms: u64,
    /// Bound on the post-action wait condition. Expiry is not a step failure.
    pub wait_timeout_ms: u64,
    /// Fixed sleep for navigation steps instead of waiting for network idle.
    pub navigation_settle_ms: u64,
    /// Pause after document-ready when a step's wait condition is a navigation.
    pub stabilization_pause_ms: u64,
    pub degradation_factor: f64,
    /// Console lines kept for crash reports.
    pub console_buffer: usize,
    pub crash_console_tail: usize,
    /// Capture a viewport JPEG and an HTML snapshot into the trace after every step.
    pub trace_step_captures: bool,
    pub trace_jpeg_quality: u8,
    /// Policy used for selector repair suggestions.
    pub policy: SelectorPolicy,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            artifacts_dir: PathBuf::from("./artifacts"),
            action_timeout_ms: 7_000,
            wait_timeout_ms: 5_000,
            navigation_settle_ms: 1_500,
            stabilization_pause_ms: 1_000,
            degradation_factor: DEFAULT_DEGRADATION_FACTOR,
            console_buffer: 50,
            crash_console_tail: 5,
            trace_step_captures: true,
            trace_jpeg_quality: 60,
            policy: SelectorPolicy::default(),
        }
    }
}

impl ReplayConfig {
    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}
