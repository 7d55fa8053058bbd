//! Per-type action dispatch.

use std::time::Duration;

use cdp_adapter::{Cdp, PageId, SelectSpec};
use goldpath_core_types::{Action, ActionKind, FailureKind, FieldContext};
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::{ReplayConfig, ReplayError};

/// Extra time granted on top of the adapter deadline before the step is declared hung.
const DISPATCH_GRACE: Duration = Duration::from_millis(500);

/// Perform `action` on `page`. Navigation steps only sleep: the recorded URL change is the
/// consequence of the previous step, and heavy pages may never reach network idle.
pub(crate) async fn dispatch(
    cdp: &dyn Cdp,
    page: PageId,
    action: &Action,
    config: &ReplayConfig,
) -> Result<(), ReplayError> {
    if let ActionKind::Navigation(nav) = &action.kind {
        debug!(target: "replay", step = action.step, to = %nav.to, "navigation settle");
        sleep(Duration::from_millis(config.navigation_settle_ms)).await;
        return Ok(());
    }

    let bound = config.action_timeout() + DISPATCH_GRACE;
    match timeout(bound, perform(cdp, page, action, config.action_timeout())).await {
        Ok(result) => result,
        Err(_) => Err(ReplayError::dispatch(
            action.step,
            FailureKind::Timeout,
            format!("{} did not complete within {}ms", action.type_name(), bound.as_millis()),
        )),
    }
}

async fn perform(
    cdp: &dyn Cdp,
    page: PageId,
    action: &Action,
    deadline: Duration,
) -> Result<(), ReplayError> {
    let step = action.step;
    let selector = action
        .selector
        .as_deref()
        .filter(|selector| !selector.trim().is_empty())
        .ok_or_else(|| {
            ReplayError::dispatch(
                step,
                FailureKind::Unsupported,
                format!("{} action has no selector", action.type_name()),
            )
        })?;

    let outcome = match &action.kind {
        ActionKind::Click(_) => cdp.click(page, selector, deadline).await,
        ActionKind::Input(field) => {
            let value = field.value.as_deref().unwrap_or_default();
            cdp.fill(page, selector, value, deadline).await
        }
        ActionKind::Select(field) if field.is_toggle() => {
            if toggle_already_applied(cdp, page, selector, field).await {
                debug!(target: "replay", step, selector, "toggle already in recorded state");
                return Ok(());
            }
            cdp.click(page, selector, deadline).await
        }
        ActionKind::Select(field) => {
            let value = field.value.clone().ok_or_else(|| {
                ReplayError::dispatch(step, FailureKind::Unsupported, "select action has no value")
            })?;
            let spec = SelectSpec {
                selector: selector.to_string(),
                value,
                match_label: true,
            };
            cdp.select_option(page, spec, deadline).await
        }
        ActionKind::Submit(_) => cdp.submit(page, selector, deadline).await,
        ActionKind::Navigation(_) => Ok(()),
    };
    outcome.map_err(|err| ReplayError::from_adapter(step, &err))
}

/// A checkbox whose recorded `checked` already matches the page must not be clicked again.
async fn toggle_already_applied(
    cdp: &dyn Cdp,
    page: PageId,
    selector: &str,
    field: &FieldContext,
) -> bool {
    let Some(expected) = field.checked else {
        return false;
    };
    let Ok(quoted) = serde_json::to_string(selector) else {
        return false;
    };
    let expression = format!(
        "(() => {{ const el = document.querySelector({quoted}); return el ? el.checked === true : null; }})()"
    );
    match cdp.evaluate_script(page, &expression).await {
        Ok(value) => value.as_bool() == Some(expected),
        Err(_) => false,
    }
}
