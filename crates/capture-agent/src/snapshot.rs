use cdp_adapter::{Cdp, PageId};
use selector_synth::StaticDom;
use tracing::debug;

use crate::{CaptureError, SNAPSHOT_SCRIPT};

/// Structural element snapshot of the page's current document.
pub async fn capture_dom<C: Cdp + ?Sized>(cdp: &C, page: PageId) -> Result<StaticDom, CaptureError> {
    let value = cdp.evaluate_script(page, SNAPSHOT_SCRIPT).await?;
    let dom = StaticDom::from_snapshot(value)?;
    debug!(target: "capture", nodes = dom.len(), url = ?dom.url(), "captured dom snapshot");
    Ok(dom)
}
