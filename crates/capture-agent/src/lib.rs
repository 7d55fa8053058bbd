//! Interaction capture agent.
//!
//! The agent is a single bundled script (`assets/agent.js`) evaluated at document start in the
//! top-level frame. It owns the page-local state: element tokens, input debounce timers and the
//! post-action settlement window. Every handled gesture is posted through one binding as an
//! [`AgentMessage::Action`], followed later by an [`AgentMessage::Settled`] carrying the wait
//! condition observed for the same token.

pub mod install;
pub mod message;
pub mod snapshot;

use cdp_adapter::AdapterError;
use goldpath_core_types::ActionType;
use selector_synth::SnapshotError;
use thiserror::Error;

pub use install::AgentConfig;
pub use message::{AgentMessage, CapturedAction};
pub use snapshot::capture_dom;

/// Bundled in-page agent, selector synthesizer included.
pub const AGENT_SOURCE: &str = include_str!("../assets/agent.js");

/// Expression returning `{url, nodes}` for [`selector_synth::StaticDom::from_snapshot`].
pub const SNAPSHOT_SCRIPT: &str = include_str!("../assets/snapshot.js");

/// Default binding name the agent posts through.
pub const BINDING_NAME: &str = "__goldpathEmit";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("malformed agent payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("agent payload has no kind")]
    MissingKind,
    #[error("unknown agent message kind `{0}`")]
    UnknownKind(String),
    #[error("context does not match {action_type} action: {source}")]
    InvalidContext {
        action_type: ActionType,
        #[source]
        source: serde_json::Error,
    },
    #[error("timestamp {0} is out of range")]
    InvalidTimestamp(i64),
    #[error("dom snapshot failed: {0}")]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}
