//! Selector synthesis
//!
//! Four tiers in fallback order, each candidate checked for uniqueness:
//! 1. Test attributes - `[data-testid="..."]` and friends
//! 2. Stable id - `#id` unless the id looks generated
//! 3. ARIA - label, labelledby, role plus accessible name
//! 4. Path - ancestor walk of `tag.class` / `tag:nth-of-type(n)` segments

use std::iter;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::classify::{is_dynamic_id, stable_classes};
use crate::dom::{DomView, NodeId};
use crate::selector::{has_same_type_siblings, nth_of_type, Combinator, Compound, Selector};

/// Selector returned when no tier produces a unique match.
pub const FALLBACK_SELECTOR: &str = "body";

const FORM_CONTROLS: &[&str] = &["input", "select", "textarea", "button"];

/// Tunables shared by the host synthesizer and the in-page agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelectorPolicy {
    /// Test attributes, highest priority first.
    pub test_attributes: Vec<String>,
    /// Most stable classes kept per path segment.
    pub max_classes: usize,
}

impl Default for SelectorPolicy {
    fn default() -> Self {
        Self {
            test_attributes: vec![
                "data-testid".to_string(),
                "data-cy".to_string(),
                "data-test".to_string(),
            ],
            max_classes: 2,
        }
    }
}

/// Which tier produced a selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    TestAttribute,
    StableId,
    Aria,
    Path,
    Fallback,
}

impl Tier {
    pub fn name(&self) -> &'static str {
        match self {
            Tier::TestAttribute => "test_attribute",
            Tier::StableId => "stable_id",
            Tier::Aria => "aria",
            Tier::Path => "path",
            Tier::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Synthesis {
    pub selector: String,
    pub tier: Tier,
}

impl Synthesis {
    fn new(selector: &Selector, tier: Tier) -> Self {
        Self {
            selector: selector.to_string(),
            tier,
        }
    }

    fn fallback() -> Self {
        Self {
            selector: FALLBACK_SELECTOR.to_string(),
            tier: Tier::Fallback,
        }
    }

    /// `false` when the caller received [`FALLBACK_SELECTOR`].
    pub fn is_usable(&self) -> bool {
        self.tier != Tier::Fallback
    }
}

#[derive(Clone, Debug, Default)]
pub struct SelectorSynth {
    policy: SelectorPolicy,
}

impl SelectorSynth {
    pub fn new(policy: SelectorPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SelectorPolicy {
        &self.policy
    }

    /// Selector string for `node`; `"body"` when nothing unique could be built.
    pub fn generate<D: DomView + ?Sized>(&self, dom: &D, node: NodeId) -> String {
        self.synthesize(dom, node).selector
    }

    pub fn synthesize<D: DomView + ?Sized>(&self, dom: &D, node: NodeId) -> Synthesis {
        let found = self
            .by_test_attribute(dom, node)
            .map(|s| Synthesis::new(&s, Tier::TestAttribute))
            .or_else(|| {
                self.by_stable_id(dom, node)
                    .map(|s| Synthesis::new(&s, Tier::StableId))
            })
            .or_else(|| self.by_aria(dom, node).map(|s| Synthesis::new(&s, Tier::Aria)))
            .or_else(|| self.by_path(dom, node).map(|s| Synthesis::new(&s, Tier::Path)));

        match found {
            Some(synthesis) => {
                trace!(target: "selector", tier = synthesis.tier.name(), selector = %synthesis.selector, "synthesized selector");
                synthesis
            }
            None => Synthesis::fallback(),
        }
    }

    fn by_test_attribute<D: DomView + ?Sized>(&self, dom: &D, node: NodeId) -> Option<Selector> {
        self.policy.test_attributes.iter().find_map(|attr| {
            let value = dom.attr(node, attr).filter(|v| !v.is_empty())?;
            unique(dom, node, Selector::new(Compound::default().with_attr(attr, value)))
        })
    }

    fn by_stable_id<D: DomView + ?Sized>(&self, dom: &D, node: NodeId) -> Option<Selector> {
        let id = dom.id(node).filter(|id| !is_dynamic_id(id))?;
        unique(dom, node, Selector::new(Compound::id(id)))
    }

    fn by_aria<D: DomView + ?Sized>(&self, dom: &D, node: NodeId) -> Option<Selector> {
        let tag = dom.tag(node);
        let attr = |name: &str| dom.attr(node, name).filter(|v| !v.trim().is_empty());
        let mut candidates = Vec::new();

        if let Some(label) = attr("aria-label") {
            candidates.push(Compound::tag(tag).with_attr("aria-label", label));
        }
        if let Some(labelledby) = attr("aria-labelledby") {
            candidates.push(Compound::tag(tag).with_attr("aria-labelledby", labelledby));
        }
        if let Some(role) = attr("role") {
            for name_attr in ["name", "title"] {
                if let Some(name) = attr(name_attr) {
                    candidates.push(
                        Compound::tag(tag)
                            .with_attr("role", role)
                            .with_attr(name_attr, name),
                    );
                }
            }
            candidates.push(Compound::tag(tag).with_attr("role", role));
        }
        if FORM_CONTROLS.contains(&tag) {
            if let Some(name) = attr("name") {
                candidates.push(Compound::tag(tag).with_attr("name", name));
                if let Some(value) = attr("value") {
                    candidates.push(
                        Compound::tag(tag)
                            .with_attr("name", name)
                            .with_attr("value", value),
                    );
                }
            }
        }

        candidates
            .into_iter()
            .find_map(|compound| unique(dom, node, Selector::new(compound)))
    }

    fn by_path<D: DomView + ?Sized>(&self, dom: &D, node: NodeId) -> Option<Selector> {
        if dom.tag(node) == "body" {
            return unique(dom, node, Selector::new(Compound::tag("body")));
        }
        if !dom.is_within_body(node) {
            return None;
        }

        // Segments ordered outermost first.
        let mut segments = vec![self.segment(dom, node)];
        let mut current = node;
        loop {
            if let Some(found) = Selector::child_chain(segments.iter().cloned())
                .and_then(|chain| unique(dom, node, chain))
            {
                return unique(dom, node, found.within(Compound::tag("body"), Combinator::Descendant));
            }
            let Some(parent) = dom.parent(current) else {
                break;
            };
            if dom.tag(parent) == "body" {
                break;
            }
            if let Some(anchor) = self.anchor(dom, parent) {
                segments.insert(0, anchor);
                if let Some(found) = Selector::child_chain(segments.iter().cloned())
                    .and_then(|chain| unique(dom, node, chain))
                {
                    return Some(found);
                }
                segments.remove(0);
            }
            segments.insert(0, self.segment(dom, parent));
            current = parent;
        }

        // Class segments alone were ambiguous; pin every level by position under body.
        let mut pinned = Vec::new();
        let mut current = node;
        while dom.tag(current) != "body" {
            pinned.insert(0, self.pinned_segment(dom, current));
            let parent = dom.parent(current)?;
            if let Some(anchor) = self.anchor(dom, parent) {
                let anchored = Selector::child_chain(iter::once(anchor).chain(pinned.iter().cloned()));
                if let Some(found) = anchored.and_then(|chain| unique(dom, node, chain)) {
                    return Some(found);
                }
            }
            current = parent;
        }
        let chain = Selector::child_chain(pinned)?;
        unique(dom, node, chain.within(Compound::tag("body"), Combinator::Child))
    }

    /// Test attribute or stable id on an ancestor.
    fn anchor<D: DomView + ?Sized>(&self, dom: &D, node: NodeId) -> Option<Compound> {
        let by_attr = self.policy.test_attributes.iter().find_map(|attr| {
            dom.attr(node, attr)
                .filter(|v| !v.is_empty())
                .map(|value| Compound::default().with_attr(attr, value))
        });
        by_attr.or_else(|| {
            dom.id(node)
                .filter(|id| !is_dynamic_id(id))
                .map(Compound::id)
        })
    }

    fn segment<D: DomView + ?Sized>(&self, dom: &D, node: NodeId) -> Compound {
        let mut compound = Compound::tag(dom.tag(node));
        let classes = stable_classes(dom.classes(node));
        if classes.is_empty() {
            if has_same_type_siblings(dom, node) {
                compound = compound.with_nth_of_type(nth_of_type(dom, node));
            }
        } else {
            for class in classes.into_iter().take(self.policy.max_classes) {
                compound = compound.with_class(class);
            }
        }
        compound
    }

    fn pinned_segment<D: DomView + ?Sized>(&self, dom: &D, node: NodeId) -> Compound {
        let mut compound = self.segment(dom, node);
        if compound.nth_of_type.is_none() {
            compound = compound.with_nth_of_type(nth_of_type(dom, node));
        }
        compound
    }
}

fn unique<D: DomView + ?Sized>(dom: &D, node: NodeId, selector: Selector) -> Option<Selector> {
    selector.selects_only(dom, node).then_some(selector)
}

/// Resolve `selector` against `dom`, in document order.
pub fn resolve<D: DomView + ?Sized>(
    dom: &D,
    selector: &str,
) -> Result<Vec<NodeId>, crate::selector::SelectorParseError> {
    Ok(Selector::parse(selector)?.query_all(dom))
}
