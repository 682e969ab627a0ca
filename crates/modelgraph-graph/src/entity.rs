//! Entities as produced by an [`crate::EntitySource`].

use serde::{Deserialize, Serialize};

/// Numeric entity identifier (`#123` in a STEP file).
pub type EntityId = u64;

/// A scalar attribute value. These become node properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    String(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
}

/// An attribute value, classified once when the entity is built.
///
/// Only `Scalar`, `Reference` and `ReferenceList` carry information into the
/// graph; everything else (unset values, nested lists, lists mixing
/// references with other values) is `Other`.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Scalar(Scalar),
    Reference(EntityId),
    ReferenceList(Vec<EntityId>),
    Other,
}

impl AttributeValue {
    pub fn string(s: impl Into<String>) -> Self {
        Self::Scalar(Scalar::String(s.into()))
    }

    pub fn integer(n: i64) -> Self {
        Self::Scalar(Scalar::Integer(n))
    }

    pub fn real(x: f64) -> Self {
        Self::Scalar(Scalar::Real(x))
    }

    pub fn boolean(b: bool) -> Self {
        Self::Scalar(Scalar::Boolean(b))
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Self::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Referenced ids in attribute order (empty for non-reference values).
    pub fn references(&self) -> &[EntityId] {
        match self {
            Self::Reference(id) => std::slice::from_ref(id),
            Self::ReferenceList(ids) => ids,
            _ => &[],
        }
    }
}

/// One record of the source model.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: EntityId,
    pub type_label: String,
    /// Attributes in declaration order.
    pub attributes: Vec<(String, AttributeValue)>,
}

impl Entity {
    pub fn new(id: EntityId, type_label: impl Into<String>) -> Self {
        Self {
            id,
            type_label: type_label.into(),
            attributes: Vec::new(),
        }
    }

    /// Builder-style attribute append, mostly for tests and fixtures.
    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.push((name.into(), value));
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn scalar_attributes(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.attributes
            .iter()
            .filter_map(|(name, value)| value.as_scalar().map(|s| (name.as_str(), s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_cover_single_and_list() {
        assert_eq!(AttributeValue::Reference(7).references(), &[7]);
        assert_eq!(
            AttributeValue::ReferenceList(vec![3, 1, 2]).references(),
            &[3, 1, 2]
        );
        assert!(AttributeValue::string("x").references().is_empty());
        assert!(AttributeValue::Other.references().is_empty());
    }

    #[test]
    fn scalar_attributes_skip_non_scalars() {
        let e = Entity::new(1, "IfcWall")
            .with_attribute("GlobalId", AttributeValue::string("2O2Fr$t4X7Zf8NOew3FLOH"))
            .with_attribute("OwnerHistory", AttributeValue::Reference(5))
            .with_attribute("Tag", AttributeValue::Other)
            .with_attribute("Height", AttributeValue::real(2.7));

        let names: Vec<&str> = e.scalar_attributes().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["GlobalId", "Height"]);
        assert_eq!(e.attribute("OwnerHistory"), Some(&AttributeValue::Reference(5)));
        assert_eq!(e.attribute("Missing"), None);
    }
}
