use cdp_adapter::PageInstall;
use selector_synth::SelectorPolicy;
use serde::{Deserialize, Serialize};

use crate::{CaptureError, AGENT_SOURCE, BINDING_NAME};

/// Settings handed to the agent before it runs in each new document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Binding the agent posts its messages through.
    pub binding: String,
    pub input_debounce_ms: u64,
    pub settle_window_ms: u64,
    /// Maximum characters of visible text kept per element.
    pub text_limit: usize,
    pub policy: SelectorPolicy,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binding: BINDING_NAME.to_string(),
            input_debounce_ms: 300,
            settle_window_ms: 500,
            text_limit: 200,
            policy: SelectorPolicy::default(),
        }
    }
}

impl AgentConfig {
    /// Assignment that publishes this config to the agent bundle.
    pub fn prelude(&self) -> Result<String, CaptureError> {
        Ok(format!(
            "window.__goldpathAgentConfig = Object.freeze({});",
            serde_json::to_string(self)?
        ))
    }

    /// Binding plus the two document-start scripts, config first.
    pub fn page_install(&self) -> Result<PageInstall, CaptureError> {
        Ok(PageInstall {
            bindings: vec![self.binding.clone()],
            scripts: vec![self.prelude()?, AGENT_SOURCE.to_string()],
        })
    }
}
