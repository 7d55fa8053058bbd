use std::path::PathBuf;

use capture_agent::AgentConfig;
use goldpath_core_types::Viewport;
use serde::{Deserialize, Serialize};

/// Recorder settings. Loaded from the `recorder` section of the goldpath config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecorderConfig {
    /// Directory receiving `golden-session-*.json` files.
    pub output_dir: PathBuf,
    /// Actions posted this early after a document load, while requests are still in flight, are
    /// treated as hydration noise.
    pub load_grace_ms: u64,
    /// A full document load only backfills a navigation wait for an action accepted this recently.
    pub backfill_window_ms: u64,
    pub navigation_timeout_ms: u64,
    pub viewport: Option<Viewport>,
    pub agent: AgentConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./recordings"),
            load_grace_ms: 2_000,
            backfill_window_ms: 10_000,
            navigation_timeout_ms: 30_000,
            viewport: None,
            agent: AgentConfig::default(),
        }
    }
}
