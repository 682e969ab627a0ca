//! Graph value returned by [`crate::extract`].
//!
//! Serialization follows the Cytoscape element envelope the viewer consumes:
//!
//! ```text
//! {"nodes": [{"data": {"id": "12", "label": "IfcWall", ...scalars}}],
//!  "edges": [{"data": {"source": "12", "target": "40", "label": "ObjectPlacement"}}]}
//! ```

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};

use crate::entity::{EntityId, Scalar};

pub const DEFAULT_MAX_NODES: usize = 50_000;
pub const DEFAULT_MAX_RELATIONSHIPS: usize = 50_000;

/// Upper bounds applied by [`crate::extract`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphCaps {
    pub max_nodes: usize,
    /// Cap on *forward* edges; reverse edges double this at most.
    pub max_relationships: usize,
}

impl GraphCaps {
    pub fn new(max_nodes: usize, max_relationships: usize) -> Self {
        Self {
            max_nodes,
            max_relationships,
        }
    }
}

impl Default for GraphCaps {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NODES, DEFAULT_MAX_RELATIONSHIPS)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: EntityId,
    pub label: String,
    /// Scalar attributes in declaration order.
    pub properties: Vec<(String, Scalar)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub source: EntityId,
    pub target: EntityId,
    pub label: String,
}

impl Edge {
    pub fn new(source: EntityId, target: EntityId, label: impl Into<String>) -> Self {
        Self {
            source,
            target,
            label: label.into(),
        }
    }
}

/// Counters describing one extraction run. Not part of the wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphSummary {
    pub entities_total: usize,
    pub nodes: usize,
    pub forward_edges: usize,
    pub edges: usize,
    pub nodes_truncated: bool,
    pub relationships_truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(skip)]
    pub summary: GraphSummary,
}

impl Graph {
    pub fn to_json_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

// ============================================================================
// Wire envelope
// ============================================================================

struct NodeData<'a>(&'a Node);

impl Serialize for NodeData<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let node = self.0;
        let mut map = serializer.serialize_map(Some(node.properties.len() + 2))?;
        map.serialize_entry("id", &node.id.to_string())?;
        map.serialize_entry("label", &node.label)?;
        for (name, value) in &node.properties {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Node", 1)?;
        s.serialize_field("data", &NodeData(self))?;
        s.end()
    }
}

#[derive(Serialize)]
struct EdgeData<'a> {
    source: String,
    target: String,
    label: &'a str,
}

impl Serialize for Edge {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Edge", 1)?;
        s.serialize_field(
            "data",
            &EdgeData {
                source: self.source.to_string(),
                target: self.target.to_string(),
                label: &self.label,
            },
        )?;
        s.end()
    }
}
