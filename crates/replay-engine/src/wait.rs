use std::time::Duration;

use cdp_adapter::{Cdp, PageId, WaitGate};
use goldpath_core_types::WaitCondition;
use tokio::time::sleep;

use crate::{ReplayConfig, ReplayError};

/// Honor a recorded wait condition. An error here means the side effect was not observed in
/// time; callers treat it as a settled step.
pub(crate) async fn settle(
    cdp: &dyn Cdp,
    page: PageId,
    step: u64,
    condition: &WaitCondition,
    config: &ReplayConfig,
) -> Result<(), ReplayError> {
    let (gate, label) = match condition {
        WaitCondition::Navigation(url) => (WaitGate::DomReady, format!("navigation to {url}")),
        WaitCondition::Selector(selector) => (
            WaitGate::SelectorVisible {
                selector: selector.clone(),
            },
            format!("selector {selector}"),
        ),
    };

    cdp.wait_basic(page, gate, config.wait_timeout())
        .await
        .map_err(|_| ReplayError::WaitTimeout {
            step,
            condition: label,
            timeout_ms: config.wait_timeout_ms,
        })?;

    if matches!(condition, WaitCondition::Navigation(_)) {
        sleep(Duration::from_millis(config.stabilization_pause_ms)).await;
    }
    Ok(())
}
