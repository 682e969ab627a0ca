//! Attribute names for common IFC entities.
//!
//! STEP records carry positional parameters only. This table restores the
//! EXPRESS attribute names (IFC2X3 layout) and the CamelCase type labels for
//! the entities that make up most of a typical building model. Each entry
//! lists its own explicit attributes and names its supertype; inherited
//! attributes come first, as in the physical file.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Resolved naming for one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySchema {
    pub name: &'static str,
    pub attributes: Vec<&'static str>,
}

type Entry = (&'static str, Option<&'static str>, &'static [&'static str]);

const ROOT: Option<&str> = Some("IfcRoot");
const OBJECT: Option<&str> = Some("IfcObject");
const PRODUCT: Option<&str> = Some("IfcProduct");
const ELEMENT: Option<&str> = Some("IfcElement");
const BUILDING_ELEMENT: Option<&str> = Some("IfcBuildingElement");
const SPATIAL: Option<&str> = Some("IfcSpatialStructureElement");

#[rustfmt::skip]
const ENTRIES: &[Entry] = &[
    // Kernel
    ("IfcRoot", None, &["GlobalId", "OwnerHistory", "Name", "Description"]),
    ("IfcObjectDefinition", ROOT, &[]),
    ("IfcObject", Some("IfcObjectDefinition"), &["ObjectType"]),
    ("IfcProduct", OBJECT, &["ObjectPlacement", "Representation"]),
    ("IfcProject", OBJECT, &["LongName", "Phase", "RepresentationContexts", "UnitsInContext"]),

    // Spatial structure
    ("IfcSpatialStructureElement", PRODUCT, &["LongName", "CompositionType"]),
    ("IfcSite", SPATIAL, &["RefLatitude", "RefLongitude", "RefElevation", "LandTitleNumber", "SiteAddress"]),
    ("IfcBuilding", SPATIAL, &["ElevationOfRefHeight", "ElevationOfTerrain", "BuildingAddress"]),
    ("IfcBuildingStorey", SPATIAL, &["Elevation"]),
    ("IfcSpace", SPATIAL, &["InteriorOrExteriorSpace", "ElevationWithFlooring"]),

    // Elements
    ("IfcElement", PRODUCT, &["Tag"]),
    ("IfcBuildingElement", ELEMENT, &[]),
    ("IfcWall", BUILDING_ELEMENT, &[]),
    ("IfcWallStandardCase", Some("IfcWall"), &[]),
    ("IfcColumn", BUILDING_ELEMENT, &[]),
    ("IfcBeam", BUILDING_ELEMENT, &[]),
    ("IfcMember", BUILDING_ELEMENT, &[]),
    ("IfcPlate", BUILDING_ELEMENT, &[]),
    ("IfcSlab", BUILDING_ELEMENT, &["PredefinedType"]),
    ("IfcRoof", BUILDING_ELEMENT, &["ShapeType"]),
    ("IfcStair", BUILDING_ELEMENT, &["ShapeType"]),
    ("IfcRailing", BUILDING_ELEMENT, &["PredefinedType"]),
    ("IfcCovering", BUILDING_ELEMENT, &["PredefinedType"]),
    ("IfcDoor", BUILDING_ELEMENT, &["OverallHeight", "OverallWidth"]),
    ("IfcWindow", BUILDING_ELEMENT, &["OverallHeight", "OverallWidth"]),
    ("IfcBuildingElementProxy", BUILDING_ELEMENT, &["CompositionType"]),
    ("IfcFeatureElement", ELEMENT, &[]),
    ("IfcFeatureElementSubtraction", Some("IfcFeatureElement"), &[]),
    ("IfcOpeningElement", Some("IfcFeatureElementSubtraction"), &[]),
    ("IfcFurnishingElement", ELEMENT, &[]),
    ("IfcDistributionElement", ELEMENT, &[]),
    ("IfcDistributionFlowElement", Some("IfcDistributionElement"), &[]),
    ("IfcFlowSegment", Some("IfcDistributionFlowElement"), &[]),
    ("IfcFlowTerminal", Some("IfcDistributionFlowElement"), &[]),

    // Relationships
    ("IfcRelationship", ROOT, &[]),
    ("IfcRelDecomposes", Some("IfcRelationship"), &["RelatingObject", "RelatedObjects"]),
    ("IfcRelAggregates", Some("IfcRelDecomposes"), &[]),
    ("IfcRelNests", Some("IfcRelDecomposes"), &[]),
    ("IfcRelConnects", Some("IfcRelationship"), &[]),
    ("IfcRelContainedInSpatialStructure", Some("IfcRelConnects"), &["RelatedElements", "RelatingStructure"]),
    ("IfcRelVoidsElement", Some("IfcRelConnects"), &["RelatingBuildingElement", "RelatedOpeningElement"]),
    ("IfcRelFillsElement", Some("IfcRelConnects"), &["RelatingOpeningElement", "RelatedBuildingElement"]),
    ("IfcRelSpaceBoundary", Some("IfcRelConnects"), &["RelatingSpace", "RelatedBuildingElement", "ConnectionGeometry", "PhysicalOrVirtualBoundary", "InternalOrExternalBoundary"]),
    ("IfcRelDefines", Some("IfcRelationship"), &["RelatedObjects"]),
    ("IfcRelDefinesByProperties", Some("IfcRelDefines"), &["RelatingPropertyDefinition"]),
    ("IfcRelDefinesByType", Some("IfcRelDefines"), &["RelatingType"]),
    ("IfcRelAssociates", Some("IfcRelationship"), &["RelatedObjects"]),
    ("IfcRelAssociatesMaterial", Some("IfcRelAssociates"), &["RelatingMaterial"]),

    // Properties and quantities
    ("IfcPropertyDefinition", ROOT, &[]),
    ("IfcPropertySetDefinition", Some("IfcPropertyDefinition"), &[]),
    ("IfcPropertySet", Some("IfcPropertySetDefinition"), &["HasProperties"]),
    ("IfcElementQuantity", Some("IfcPropertySetDefinition"), &["MethodOfMeasurement", "Quantities"]),
    ("IfcProperty", None, &["Name", "Description"]),
    ("IfcSimpleProperty", Some("IfcProperty"), &[]),
    ("IfcPropertySingleValue", Some("IfcSimpleProperty"), &["NominalValue", "Unit"]),
    ("IfcPropertyEnumeratedValue", Some("IfcSimpleProperty"), &["EnumerationValues", "EnumerationReference"]),
    ("IfcPhysicalQuantity", None, &["Name", "Description"]),
    ("IfcPhysicalSimpleQuantity", Some("IfcPhysicalQuantity"), &["Unit"]),
    ("IfcQuantityLength", Some("IfcPhysicalSimpleQuantity"), &["LengthValue"]),
    ("IfcQuantityArea", Some("IfcPhysicalSimpleQuantity"), &["AreaValue"]),
    ("IfcQuantityVolume", Some("IfcPhysicalSimpleQuantity"), &["VolumeValue"]),
    ("IfcQuantityCount", Some("IfcPhysicalSimpleQuantity"), &["CountValue"]),
    ("IfcQuantityWeight", Some("IfcPhysicalSimpleQuantity"), &["WeightValue"]),

    // Actors and ownership
    ("IfcOwnerHistory", None, &["OwningUser", "OwningApplication", "State", "ChangeAction", "LastModifiedDate", "LastModifyingUser", "LastModifyingApplication", "CreationDate"]),
    ("IfcPerson", None, &["Id", "FamilyName", "GivenName", "MiddleNames", "PrefixTitles", "SuffixTitles", "Roles", "Addresses"]),
    ("IfcOrganization", None, &["Id", "Name", "Description", "Roles", "Addresses"]),
    ("IfcPersonAndOrganization", None, &["ThePerson", "TheOrganization", "Roles"]),
    ("IfcApplication", None, &["ApplicationDeveloper", "Version", "ApplicationFullName", "ApplicationIdentifier"]),

    // Geometry and placement
    ("IfcCartesianPoint", None, &["Coordinates"]),
    ("IfcDirection", None, &["DirectionRatios"]),
    ("IfcPlacement", None, &["Location"]),
    ("IfcAxis2Placement2D", Some("IfcPlacement"), &["RefDirection"]),
    ("IfcAxis2Placement3D", Some("IfcPlacement"), &["Axis", "RefDirection"]),
    ("IfcLocalPlacement", None, &["PlacementRelTo", "RelativePlacement"]),
    ("IfcPolyline", None, &["Points"]),
    ("IfcSweptAreaSolid", None, &["SweptArea", "Position"]),
    ("IfcExtrudedAreaSolid", Some("IfcSweptAreaSolid"), &["ExtrudedDirection", "Depth"]),
    ("IfcProfileDef", None, &["ProfileType", "ProfileName"]),
    ("IfcParameterizedProfileDef", Some("IfcProfileDef"), &["Position"]),
    ("IfcRectangleProfileDef", Some("IfcParameterizedProfileDef"), &["XDim", "YDim"]),
    ("IfcCircleProfileDef", Some("IfcParameterizedProfileDef"), &["Radius"]),

    // Representation
    ("IfcRepresentationContext", None, &["ContextIdentifier", "ContextType"]),
    ("IfcGeometricRepresentationContext", Some("IfcRepresentationContext"), &["CoordinateSpaceDimension", "Precision", "WorldCoordinateSystem", "TrueNorth"]),
    ("IfcGeometricRepresentationSubContext", Some("IfcGeometricRepresentationContext"), &["ParentContext", "TargetScale", "TargetView", "UserDefinedTargetView"]),
    ("IfcRepresentation", None, &["ContextOfItems", "RepresentationIdentifier", "RepresentationType", "Items"]),
    ("IfcShapeRepresentation", Some("IfcRepresentation"), &[]),
    ("IfcProductRepresentation", None, &["Name", "Description", "Representations"]),
    ("IfcProductDefinitionShape", Some("IfcProductRepresentation"), &[]),

    // Units and materials
    ("IfcUnitAssignment", None, &["Units"]),
    ("IfcSIUnit", None, &["Dimensions", "UnitType", "Prefix", "Name"]),
    ("IfcDimensionalExponents", None, &["LengthExponent", "MassExponent", "TimeExponent", "ElectricCurrentExponent", "ThermodynamicTemperatureExponent", "AmountOfSubstanceExponent", "LuminousIntensityExponent"]),
    ("IfcMaterial", None, &["Name"]),
];

fn table() -> &'static HashMap<String, EntitySchema> {
    static TABLE: OnceLock<HashMap<String, EntitySchema>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let by_name: HashMap<&str, &Entry> = ENTRIES.iter().map(|e| (e.0, e)).collect();
        ENTRIES
            .iter()
            .map(|&(name, _, _)| {
                let mut chain = Vec::new();
                let mut cur = by_name.get(name).copied();
                while let Some(&(_, parent, own)) = cur {
                    chain.push(own);
                    cur = parent.and_then(|p| by_name.get(p).copied());
                }
                let attributes = chain.into_iter().rev().flatten().copied().collect();
                (name.to_ascii_uppercase(), EntitySchema { name, attributes })
            })
            .collect()
    })
}

/// Look up an entity type by its STEP keyword (case-insensitive).
pub fn lookup(type_name: &str) -> Option<&'static EntitySchema> {
    table().get(&type_name.to_ascii_uppercase())
}

/// Attribute name for position `index`, falling back to `arg<index>`.
pub fn attribute_name(schema: Option<&EntitySchema>, index: usize) -> String {
    schema
        .and_then(|s| s.attributes.get(index))
        .map(|n| n.to_string())
        .unwrap_or_else(|| format!("arg{index}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inherited_attributes_come_first() {
        let wall = lookup("IFCWALL").unwrap();
        assert_eq!(wall.name, "IfcWall");
        assert_eq!(
            wall.attributes,
            vec![
                "GlobalId",
                "OwnerHistory",
                "Name",
                "Description",
                "ObjectType",
                "ObjectPlacement",
                "Representation",
                "Tag"
            ]
        );
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("IfcRelAggregates").unwrap().attributes[4], "RelatingObject");
        assert!(lookup("IFCNOTATHING").is_none());
    }

    #[test]
    fn every_parent_is_in_the_table() {
        for (name, parent, _) in ENTRIES {
            if let Some(parent) = parent {
                assert!(
                    ENTRIES.iter().any(|(n, _, _)| n == parent),
                    "{name} names unknown supertype {parent}"
                );
            }
        }
    }

    #[test]
    fn positional_fallback() {
        let point = lookup("IFCCARTESIANPOINT");
        assert_eq!(attribute_name(point, 0), "Coordinates");
        assert_eq!(attribute_name(point, 1), "arg1");
        assert_eq!(attribute_name(None, 3), "arg3");
    }
}
