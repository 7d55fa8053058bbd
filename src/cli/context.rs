use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use cdp_adapter::{event_bus, CdpAdapter};
use tracing::info;

use crate::cli::output::OutputFormat;
use crate::config::GoldpathConfig;

const EVENT_BUS_CAPACITY: usize = 1024;

pub struct CliContext {
    config: Arc<GoldpathConfig>,
    config_path: PathBuf,
    output: OutputFormat,
}

impl CliContext {
    pub fn new(config: GoldpathConfig, config_path: PathBuf, output: OutputFormat) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
            output,
        }
    }

    pub fn config(&self) -> &GoldpathConfig {
        self.config.as_ref()
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn output(&self) -> OutputFormat {
        self.output
    }

    /// Launch Chromium (or attach to `browser.websocket_url`) with the configured settings.
    pub async fn launch_browser(&self, headless: Option<bool>) -> Result<Arc<CdpAdapter>> {
        let mut cfg = self.config.cdp_config();
        if let Some(headless) = headless {
            cfg.headless = headless;
        }
        info!(headless = cfg.headless, attach = cfg.websocket_url.is_some(), "launching browser");
        let (bus, _initial) = event_bus(EVENT_BUS_CAPACITY);
        CdpAdapter::launch(cfg, bus)
            .await
            .context("failed to start the browser")
    }
}
