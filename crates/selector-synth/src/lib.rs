//! Stable CSS selector synthesis for recorded page elements.

pub mod classify;
pub mod dom;
pub mod selector;
pub mod synth;

pub use classify::{is_dynamic_id, is_unstable_class};
pub use dom::{DomView, NodeId, SnapshotError, StaticDom, StaticNode};
pub use selector::{Selector, SelectorParseError};
pub use synth::{resolve, SelectorPolicy, SelectorSynth, Synthesis, Tier, FALLBACK_SELECTOR};
