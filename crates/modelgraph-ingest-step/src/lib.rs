//! STEP/IFC ingestion for modelgraph
//!
//! This crate parses ISO-10303-21 physical files (the IFC exchange format)
//! and exposes them through [`modelgraph_graph::EntitySource`]:
//! - [`parser`]: nom-based record parser,
//! - [`schema`]: attribute names and type labels for common IFC entities,
//! - [`source`]: value classification and the file-backed source.

pub mod parser;
pub mod schema;
pub mod source;

pub use parser::{
    parse_step, StepEntity, StepError, StepFile, StepHeader, StepValue, MAX_NESTING,
};
pub use source::{classify, entities_from_step, StepEntitySource};

/// Parse STEP text straight into id-ordered entities.
pub fn parse_entities(text: &str) -> Result<Vec<modelgraph_graph::Entity>, StepError> {
    Ok(entities_from_step(parse_step(text)?))
}
