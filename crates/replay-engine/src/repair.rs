//! Selector repair suggestions for failed steps.
//!
//! The recorded element context is matched against a structural snapshot of the current page;
//! the best candidate is run back through the synthesizer. Suggestions are diagnostic only and
//! never replace the recorded selector during a run.

use std::collections::BTreeSet;

use goldpath_core_types::ElementContext;
use selector_synth::{is_dynamic_id, DomView, NodeId, SelectorSynth, Tier};
use tracing::debug;

/// Candidates below this score are not suggested.
pub const MIN_CONFIDENCE: f64 = 0.5;

/// Attributes that identify a control without being test hooks.
const IDENTIFYING_ATTRIBUTES: [&str; 6] = ["name", "type", "placeholder", "aria-label", "href", "role"];

#[derive(Clone, Debug, PartialEq)]
pub struct Repair {
    pub node: NodeId,
    pub selector: String,
    pub confidence: f64,
    pub tier: Tier,
}

/// Score how well `node` matches the recorded element. Zero when the tag differs.
pub fn score<D: DomView + ?Sized>(
    dom: &D,
    node: NodeId,
    recorded: &ElementContext,
    test_attributes: &[String],
) -> f64 {
    if !recorded.is_tag(dom.tag(node)) {
        return 0.0;
    }
    let mut score = 0.1;

    for attr in test_attributes {
        if let (Some(expected), Some(actual)) = (recorded.attribute(attr), dom.attr(node, attr)) {
            if expected == actual {
                score += 0.5;
                break;
            }
        }
    }

    if let (Some(expected), Some(actual)) = (recorded.id.as_deref(), dom.id(node)) {
        if expected == actual && !is_dynamic_id(expected) {
            score += 0.3;
        }
    }

    let attribute_score: f64 = IDENTIFYING_ATTRIBUTES
        .iter()
        .filter(|attr| {
            matches!(
                (recorded.attribute(attr), dom.attr(node, attr)),
                (Some(expected), Some(actual)) if expected == actual
            )
        })
        .map(|attr| if *attr == "name" { 0.2 } else { 0.1 })
        .sum();
    score += attribute_score.min(0.3);

    if let (Some(expected), Some(actual)) = (recorded.text.as_deref(), dom.text(node)) {
        let expected = normalize(expected);
        let actual = normalize(actual);
        if !expected.is_empty() {
            if expected == actual {
                score += 0.3;
            } else if actual.contains(&expected) || (!actual.is_empty() && expected.contains(&actual)) {
                score += 0.15;
            }
        }
    }

    if !recorded.class_list.is_empty() {
        let recorded_classes: BTreeSet<&str> =
            recorded.class_list.iter().map(String::as_str).collect();
        let current: BTreeSet<&str> = dom.classes(node).into_iter().collect();
        let shared = recorded_classes.intersection(&current).count();
        score += 0.2 * shared as f64 / recorded_classes.len() as f64;
    }

    score.min(1.0)
}

/// Best-matching element for `recorded`, synthesized into a fresh selector. Returns `None` when no
/// candidate is confident enough, when the top two candidates tie, or when the synthesizer can
/// only produce the recorded selector again.
pub fn suggest<D: DomView + ?Sized>(
    dom: &D,
    recorded: &ElementContext,
    recorded_selector: Option<&str>,
    synth: &SelectorSynth,
) -> Option<Repair> {
    let test_attributes = &synth.policy().test_attributes;
    let mut ranked: Vec<(NodeId, f64)> = dom
        .elements()
        .into_iter()
        .filter(|node| dom.is_within_body(*node))
        .map(|node| (node, score(dom, node, recorded, test_attributes)))
        .filter(|(_, score)| *score >= MIN_CONFIDENCE)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    let (node, confidence) = *ranked.first()?;
    if let Some((_, runner_up)) = ranked.get(1) {
        if (confidence - runner_up).abs() < f64::EPSILON {
            debug!(target: "replay", confidence, "ambiguous repair candidates");
            return None;
        }
    }

    let synthesis = synth.synthesize(dom, node);
    if !synthesis.is_usable() || Some(synthesis.selector.as_str()) == recorded_selector {
        return None;
    }
    Some(Repair {
        node,
        selector: synthesis.selector,
        confidence,
        tier: synthesis.tier,
    })
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}
