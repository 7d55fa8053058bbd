//! Read-only DOM access used by synthesis and matching.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub type NodeId = usize;

/// Element tree as seen by the synthesizer. Only element nodes are exposed.
pub trait DomView {
    /// Every element, in document order.
    fn elements(&self) -> Vec<NodeId>;
    /// Lowercase tag name.
    fn tag(&self, node: NodeId) -> &str;
    fn attr(&self, node: NodeId, name: &str) -> Option<&str>;
    fn parent(&self, node: NodeId) -> Option<NodeId>;
    /// Element children, in document order.
    fn children(&self, node: NodeId) -> Vec<NodeId>;
    /// Normalized visible text, if captured.
    fn text(&self, node: NodeId) -> Option<&str>;

    fn id(&self, node: NodeId) -> Option<&str> {
        self.attr(node, "id").filter(|id| !id.is_empty())
    }

    fn classes(&self, node: NodeId) -> Vec<&str> {
        self.attr(node, "class")
            .map(|raw| raw.split_whitespace().collect())
            .unwrap_or_default()
    }

    fn body(&self) -> Option<NodeId> {
        self.elements()
            .into_iter()
            .find(|node| self.tag(*node) == "body")
    }

    fn is_within_body(&self, node: NodeId) -> bool {
        let mut current = self.parent(node);
        while let Some(ancestor) = current {
            if self.tag(ancestor) == "body" {
                return true;
            }
            current = self.parent(ancestor);
        }
        false
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("malformed snapshot: {0}")]
    Json(#[from] serde_json::Error),
    #[error("node {node} references parent {parent} that does not precede it")]
    InvalidParent { node: NodeId, parent: NodeId },
}

/// One element of a [`StaticDom`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StaticNode {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(skip)]
    children: Vec<NodeId>,
}

#[derive(Deserialize)]
struct SnapshotWire {
    #[serde(default)]
    url: Option<String>,
    nodes: Vec<StaticNode>,
}

/// Detached element tree, either built by hand or decoded from a page snapshot.
///
/// Snapshots are `{ "url": ..., "nodes": [{ "tag", "attrs", "text", "parent" }] }` with nodes in
/// document order, so every parent index precedes its children.
#[derive(Clone, Debug, Default)]
pub struct StaticDom {
    url: Option<String>,
    nodes: Vec<StaticNode>,
}

impl StaticDom {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an element as the last child of `parent`.
    pub fn append(&mut self, parent: Option<NodeId>, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(StaticNode {
            tag: tag.to_ascii_lowercase(),
            attrs: attrs
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            text: None,
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            self.nodes[parent].children.push(id);
        }
        id
    }

    pub fn set_text(&mut self, node: NodeId, text: impl Into<String>) {
        if let Some(entry) = self.nodes.get_mut(node) {
            entry.text = Some(text.into());
        }
    }

    pub fn from_snapshot(value: Value) -> Result<Self, SnapshotError> {
        let wire: SnapshotWire = serde_json::from_value(value)?;
        let mut nodes = wire.nodes;
        for index in 0..nodes.len() {
            nodes[index].tag = nodes[index].tag.to_ascii_lowercase();
            if let Some(parent) = nodes[index].parent {
                if parent >= index {
                    return Err(SnapshotError::InvalidParent {
                        node: index,
                        parent,
                    });
                }
                nodes[parent].children.push(index);
            }
        }
        Ok(Self {
            url: wire.url,
            nodes,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, SnapshotError> {
        Self::from_snapshot(serde_json::from_str(raw)?)
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&StaticNode> {
        self.nodes.get(id)
    }
}

impl DomView for StaticDom {
    fn elements(&self) -> Vec<NodeId> {
        (0..self.nodes.len()).collect()
    }

    fn tag(&self, node: NodeId) -> &str {
        self.nodes
            .get(node)
            .map(|entry| entry.tag.as_str())
            .unwrap_or_default()
    }

    fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.nodes
            .get(node)
            .and_then(|entry| entry.attrs.get(name))
            .map(String::as_str)
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node).and_then(|entry| entry.parent)
    }

    fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(node)
            .map(|entry| entry.children.clone())
            .unwrap_or_default()
    }

    fn text(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node).and_then(|entry| entry.text.as_deref())
    }
}
