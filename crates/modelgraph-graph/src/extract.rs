//! Bounded graph extraction.
//!
//! Single node pass plus a capped forward-edge pass over the retained
//! entities, followed by one reverse pass over the finished forward edges.
//! Output is a pure function of the entity set and the caps.

use crate::entity::Entity;
use crate::graph::{Edge, Graph, GraphCaps, GraphSummary, Node};

/// Label prefix of synthesized reverse edges.
pub const REVERSE_PREFIX: &str = "back_";

/// Node keys that attributes may not shadow.
const RESERVED_NODE_KEYS: [&str; 2] = ["id", "label"];

/// Build a capped node/edge graph from an entity collection.
///
/// Entities are ordered by id and truncated to `caps.max_nodes` before any
/// processing. Edge targets are not checked against the retained node set:
/// an attribute pointing past the truncation still yields an edge.
pub fn extract<I>(entities: I, caps: GraphCaps) -> Graph
where
    I: IntoIterator<Item = Entity>,
{
    let mut entities: Vec<Entity> = entities.into_iter().collect();
    let entities_total = entities.len();

    entities.sort_by_key(|e| e.id);
    entities.truncate(caps.max_nodes);

    let nodes: Vec<Node> = entities.iter().map(node_for).collect();

    let mut forward: Vec<Edge> = Vec::new();
    let mut relationships_truncated = false;
    'entities: for entity in &entities {
        for (name, value) in &entity.attributes {
            for &target in value.references() {
                if forward.len() >= caps.max_relationships {
                    relationships_truncated = true;
                    break 'entities;
                }
                forward.push(Edge::new(entity.id, target, name.clone()));
            }
        }
    }

    let forward_edges = forward.len();
    let mut edges = forward;
    edges.reserve(forward_edges);
    for i in 0..forward_edges {
        let reversed = reverse_of(&edges[i]);
        edges.push(reversed);
    }

    let summary = GraphSummary {
        entities_total,
        nodes: nodes.len(),
        forward_edges,
        edges: edges.len(),
        nodes_truncated: entities_total > nodes.len(),
        relationships_truncated,
    };

    tracing::debug!(
        entities = summary.entities_total,
        nodes = summary.nodes,
        edges = summary.edges,
        "graph extracted"
    );

    Graph {
        nodes,
        edges,
        summary,
    }
}

fn node_for(entity: &Entity) -> Node {
    let mut properties = Vec::new();
    for (name, scalar) in entity.scalar_attributes() {
        if RESERVED_NODE_KEYS.contains(&name) {
            continue;
        }
        if properties.iter().any(|(n, _): &(String, _)| n == name) {
            continue;
        }
        properties.push((name.to_string(), scalar.clone()));
    }

    Node {
        id: entity.id,
        label: entity.type_label.clone(),
        properties,
    }
}

fn reverse_of(edge: &Edge) -> Edge {
    Edge::new(
        edge.target,
        edge.source,
        format!("{REVERSE_PREFIX}{}", edge.label),
    )
}
