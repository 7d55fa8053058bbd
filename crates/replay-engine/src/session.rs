use std::path::Path;

use goldpath_core_types::{ActionType, GoldenSession};
use serde_json::Value;
use tracing::warn;

use crate::ReplayError;

/// Read a Golden Session for replay. Actions of a type this build cannot replay are logged and
/// skipped; anything else malformed rejects the file.
pub async fn load_session(path: &Path) -> Result<GoldenSession, ReplayError> {
    let raw = tokio::fs::read_to_string(path).await?;
    parse_session(&raw)
}

pub fn parse_session(raw: &str) -> Result<GoldenSession, ReplayError> {
    let mut document: Value = serde_json::from_str(raw)?;
    if let Some(actions) = document.get_mut("actions").and_then(Value::as_array_mut) {
        actions.retain(|action| {
            let kind = action.get("type").cloned().unwrap_or(Value::Null);
            let known = serde_json::from_value::<ActionType>(kind.clone()).is_ok();
            if !known {
                warn!(
                    target: "replay",
                    step = ?action.get("step"),
                    action_type = %kind,
                    "skipping action of unknown type"
                );
            }
            known
        });
    }
    let session: GoldenSession = serde_json::from_value(document)?;
    session.validate()?;
    Ok(session)
}
