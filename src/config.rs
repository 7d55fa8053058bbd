//! `goldpath.yaml` configuration.
//!
//! Every section is optional; missing keys fall back to the defaults of the crate that owns the
//! setting. Sections map onto [`CdpConfig`], [`RecorderConfig`] and [`ReplayConfig`].

use std::path::PathBuf;

use cdp_adapter::CdpConfig;
use goldpath_core_types::Viewport;
use replay_engine::ReplayConfig;
use serde::{Deserialize, Serialize};
use session_recorder::RecorderConfig;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GoldpathConfig {
    pub browser: BrowserSection,
    pub recorder: RecorderSection,
    pub replay: ReplaySection,
    pub logging: LoggingSection,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    /// Unset keeps the `GOLDPATH_HEADLESS` driven default.
    pub headless: Option<bool>,
    pub chrome_path: Option<PathBuf>,
    pub user_data_dir: Option<PathBuf>,
    pub viewport: Option<Viewport>,
    /// Attach to a running browser instead of launching one.
    pub websocket_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSection {
    pub output_dir: PathBuf,
    pub input_debounce_ms: u64,
    pub settle_window_ms: u64,
    pub load_grace_ms: u64,
    pub text_limit: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySection {
    pub artifacts_dir: PathBuf,
    pub action_timeout_ms: u64,
    pub wait_timeout_ms: u64,
    pub navigation_settle_ms: u64,
    pub degradation_factor: f64,
    pub console_buffer: usize,
    pub crash_console_tail: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<String>,
    /// Emit stderr logs as JSON lines for CI log collectors.
    pub json: bool,
    /// Also write logs to this file.
    pub file: Option<PathBuf>,
}

impl Default for RecorderSection {
    fn default() -> Self {
        let defaults = RecorderConfig::default();
        Self {
            output_dir: defaults.output_dir,
            input_debounce_ms: defaults.agent.input_debounce_ms,
            settle_window_ms: defaults.agent.settle_window_ms,
            load_grace_ms: defaults.load_grace_ms,
            text_limit: defaults.agent.text_limit,
        }
    }
}

impl Default for ReplaySection {
    fn default() -> Self {
        let defaults = ReplayConfig::default();
        Self {
            artifacts_dir: defaults.artifacts_dir,
            action_timeout_ms: defaults.action_timeout_ms,
            wait_timeout_ms: defaults.wait_timeout_ms,
            navigation_settle_ms: defaults.navigation_settle_ms,
            degradation_factor: defaults.degradation_factor,
            console_buffer: defaults.console_buffer,
            crash_console_tail: defaults.crash_console_tail,
        }
    }
}

impl GoldpathConfig {
    pub fn cdp_config(&self) -> CdpConfig {
        let mut cfg = CdpConfig::default();
        let browser = &self.browser;
        if let Some(headless) = browser.headless {
            cfg.headless = headless;
        }
        if let Some(path) = &browser.chrome_path {
            cfg.executable = path.clone();
        }
        cfg.user_data_dir = browser.user_data_dir.clone();
        cfg.websocket_url = browser.websocket_url.clone();
        cfg.window_size = browser
            .viewport
            .map(|viewport| (viewport.width, viewport.height));
        cfg
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        let section = &self.recorder;
        let mut cfg = RecorderConfig {
            output_dir: section.output_dir.clone(),
            load_grace_ms: section.load_grace_ms,
            viewport: self.browser.viewport,
            ..RecorderConfig::default()
        };
        cfg.agent.input_debounce_ms = section.input_debounce_ms;
        cfg.agent.settle_window_ms = section.settle_window_ms;
        cfg.agent.text_limit = section.text_limit;
        cfg
    }

    pub fn replay_config(&self) -> ReplayConfig {
        let section = &self.replay;
        ReplayConfig {
            artifacts_dir: section.artifacts_dir.clone(),
            action_timeout_ms: section.action_timeout_ms,
            wait_timeout_ms: section.wait_timeout_ms,
            navigation_settle_ms: section.navigation_settle_ms,
            degradation_factor: section.degradation_factor,
            console_buffer: section.console_buffer,
            crash_console_tail: section.crash_console_tail,
            ..ReplayConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: GoldpathConfig = serde_yaml::from_str(
            "browser:\n  headless: false\n  viewport: { width: 1366, height: 768 }\nreplay:\n  action_timeout_ms: 9000\n",
        )
        .unwrap();

        let replay = config.replay_config();
        assert_eq!(replay.action_timeout_ms, 9_000);
        assert_eq!(replay.wait_timeout_ms, 5_000);
        assert_eq!(replay.navigation_settle_ms, 1_500);

        let recorder = config.recorder_config();
        assert_eq!(recorder.output_dir, PathBuf::from("./recordings"));
        assert_eq!(recorder.agent.input_debounce_ms, 300);
        assert_eq!(recorder.viewport, Some(Viewport { width: 1366, height: 768 }));

        let cdp = config.cdp_config();
        assert!(!cdp.headless);
        assert_eq!(cdp.window_size, Some((1366, 768)));
    }

    #[test]
    fn empty_document_is_all_defaults() {
        let config: GoldpathConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.logging.file.is_none());
        assert!(!config.logging.json);
        assert_eq!(config.replay_config().crash_console_tail, 5);
        assert_eq!(config.recorder_config().agent.settle_window_ms, 500);
    }
}
