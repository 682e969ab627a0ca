//! [`EntitySource`] over STEP/IFC files.

use std::collections::BTreeMap;
use std::path::Path;

use modelgraph_graph::{AttributeValue, Entity, EntitySource, Scalar, SourceError};

use crate::parser::{parse_step, StepEntity, StepFile, StepValue};
use crate::schema;

/// Reads an IFC file from disk and names its attributes from the built-in
/// schema table.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepEntitySource;

impl EntitySource for StepEntitySource {
    fn load(&self, path: &Path) -> Result<Vec<Entity>, SourceError> {
        let bytes = std::fs::read(path).map_err(|source| SourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        // STEP is 7-bit text; anything else is mangled rather than rejected.
        let text = String::from_utf8_lossy(&bytes);
        let file = parse_step(&text).map_err(|e| SourceError::Parse(e.to_string()))?;

        tracing::debug!(
            path = %path.display(),
            schema = %file.header.file_schema.join(","),
            records = file.data.len(),
            "parsed STEP file"
        );
        Ok(entities_from_step(file))
    }
}

/// Convert parsed records into id-ordered entities. A repeated id keeps its
/// last record.
pub fn entities_from_step(file: StepFile) -> Vec<Entity> {
    let mut by_id: BTreeMap<u64, Entity> = BTreeMap::new();
    for record in file.data {
        let id = record.id;
        if by_id.insert(id, entity_from_record(record)).is_some() {
            tracing::warn!(id, "duplicate entity id in STEP file; keeping the last record");
        }
    }
    by_id.into_values().collect()
}

fn entity_from_record(record: StepEntity) -> Entity {
    let schema = if record.is_complex() {
        None
    } else {
        schema::lookup(&record.type_names[0])
    };
    let type_label = match schema {
        Some(s) => s.name.to_string(),
        None => record.type_name(),
    };

    let attributes = record
        .attributes
        .into_iter()
        .enumerate()
        .map(|(i, value)| (schema::attribute_name(schema, i), classify(value)))
        .collect();

    Entity {
        id: record.id,
        type_label,
        attributes,
    }
}

/// Decide once what an attribute value means for the graph.
pub fn classify(value: StepValue) -> AttributeValue {
    match value {
        StepValue::Integer(n) => AttributeValue::Scalar(Scalar::Integer(n)),
        StepValue::Real(x) => AttributeValue::Scalar(Scalar::Real(x)),
        StepValue::String(s) => AttributeValue::Scalar(Scalar::String(s)),
        StepValue::Binary(hex) => AttributeValue::Scalar(Scalar::String(hex)),
        StepValue::Enum(e) => match e.as_str() {
            "T" => AttributeValue::Scalar(Scalar::Boolean(true)),
            "F" => AttributeValue::Scalar(Scalar::Boolean(false)),
            "U" => AttributeValue::Scalar(Scalar::String("UNKNOWN".to_string())),
            _ => AttributeValue::Scalar(Scalar::String(e)),
        },
        StepValue::Reference(id) => AttributeValue::Reference(id),
        StepValue::List(items) => {
            let refs: Option<Vec<u64>> = items
                .iter()
                .map(|v| match v {
                    StepValue::Reference(id) => Some(*id),
                    _ => None,
                })
                .collect();
            match refs {
                Some(ids) => AttributeValue::ReferenceList(ids),
                None => AttributeValue::Other,
            }
        }
        // IFCLABEL('x') and friends: keep the wrapped scalar.
        StepValue::TypedValue(_, inner) => match classify(*inner) {
            scalar @ AttributeValue::Scalar(_) => scalar,
            _ => AttributeValue::Other,
        },
        StepValue::Null | StepValue::Derived => AttributeValue::Other,
    }
}
