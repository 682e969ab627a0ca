//! Entity model and bounded graph extraction.
//!
//! This crate is the pure half of modelgraph:
//! - [`Entity`] / [`AttributeValue`]: the read-only view of a parsed model,
//!   with every attribute classified once at parse time,
//! - [`EntitySource`]: the seam behind which model parsers live,
//! - [`extract`]: turns an entity collection into a capped node/edge
//!   [`Graph`] suitable for visualization.
//!
//! Nothing here touches the network or the upload staging area.

pub mod entity;
pub mod extract;
pub mod graph;
pub mod source;

pub use entity::{AttributeValue, Entity, EntityId, Scalar};
pub use extract::{extract, REVERSE_PREFIX};
pub use graph::{
    Edge, Graph, GraphCaps, GraphSummary, Node, DEFAULT_MAX_NODES, DEFAULT_MAX_RELATIONSHIPS,
};
pub use source::{EntitySource, InMemorySource, SourceError};
