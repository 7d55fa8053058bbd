use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::discover;

/// How to reach a browser: launch one (the default) or attach to `websocket_url`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CdpConfig {
    /// Chrome binary; empty means "discover at launch".
    pub executable: PathBuf,
    /// Profile directory; a scratch profile is created and removed when unset.
    pub user_data_dir: Option<PathBuf>,
    pub headless: bool,
    pub window_size: Option<(u32, u32)>,
    /// Reply deadline for every protocol command.
    pub default_deadline_ms: u64,
    pub websocket_url: Option<String>,
    /// Interval between liveness probes; zero disables probing.
    pub liveness_probe_ms: u64,
    pub extra_args: Vec<String>,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            executable: discover::detect().unwrap_or_default(),
            user_data_dir: None,
            headless: headless_from_env(env::var("GOLDPATH_HEADLESS").ok().as_deref()),
            window_size: None,
            default_deadline_ms: 30_000,
            websocket_url: None,
            liveness_probe_ms: 15_000,
            extra_args: Vec::new(),
        }
    }
}

/// `GOLDPATH_HEADLESS=0|false|no|off` asks for a visible browser; anything else, or nothing, is
/// headless.
fn headless_from_env(value: Option<&str>) -> bool {
    match value.map(|raw| raw.trim().to_ascii_lowercase()) {
        Some(flag) => !matches!(flag.as_str(), "0" | "false" | "no" | "off"),
        None => true,
    }
}
