//! Tap tuning knobs.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    /// A request still open after this long stops counting as pending. Long polls and event
    /// streams would otherwise keep a page busy forever.
    pub stale_request_ms: u64,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            stale_request_ms: 10_000,
        }
    }
}
