//! Integration tests for the complete modelgraph pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - STEP text → ChunkStore → UploadCoordinator → Graph
//! - Graph → wire JSON
//!
//! Run with: cargo test --test integration_tests

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use modelgraph_graph::{
    AttributeValue, Entity, EntitySource, Graph, GraphCaps, Scalar, SourceError,
};
use modelgraph_ingest_step::StepEntitySource;
use modelgraph_storage::{
    ChunkOutcome, ChunkStore, ChunkUpload, UploadCoordinator, UploadError, DEFAULT_SESSION_TTL,
};
use tempfile::tempdir;

fn coordinator(source: Arc<dyn EntitySource>) -> (UploadCoordinator, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let store = ChunkStore::new(dir.path().join("uploads")).unwrap();
    (UploadCoordinator::new(store, source, DEFAULT_SESSION_TTL), dir)
}

fn chunk(session: &str, index: u32, total: u32, bytes: &[u8]) -> ChunkUpload {
    ChunkUpload {
        session_id: session.to_string(),
        index,
        total_chunks: total,
        bytes: Bytes::copy_from_slice(bytes),
    }
}

/// Send `parts` in the given order and return the graph of the completing
/// chunk, asserting every earlier chunk was only acknowledged.
fn upload_in_order(
    coordinator: &UploadCoordinator,
    session: &str,
    parts: &[&[u8]],
    order: &[usize],
    caps: GraphCaps,
) -> Graph {
    let total = parts.len() as u32;
    let mut completed = None;
    for (position, &i) in order.iter().enumerate() {
        match coordinator
            .accept_chunk(chunk(session, i as u32, total, parts[i]), caps)
            .unwrap()
        {
            ChunkOutcome::Received { index } => {
                assert_eq!(index, i as u32);
                assert!(position + 1 < order.len(), "last chunk must complete");
            }
            ChunkOutcome::Completed(graph) => {
                assert_eq!(position + 1, order.len(), "completed early");
                completed = Some(graph);
            }
        }
    }
    completed.expect("upload never completed")
}

fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            found.extend(files_under(&path));
        } else {
            found.push(path);
        }
    }
    found
}

fn step_file(records: &[&str]) -> String {
    format!(
        "ISO-10303-21;\nHEADER;\nFILE_DESCRIPTION((''),'2;1');\n\
         FILE_NAME('t.ifc','',(''),(''),'','','');\nFILE_SCHEMA(('IFC2X3'));\nENDSEC;\n\
         DATA;\n{}\nENDSEC;\nEND-ISO-10303-21;\n",
        records.join("\n")
    )
}

/// Split text into `n` nearly equal byte ranges.
fn split(text: &str, n: usize) -> Vec<&[u8]> {
    let bytes = text.as_bytes();
    (0..n)
        .map(|i| &bytes[i * bytes.len() / n..(i + 1) * bytes.len() / n])
        .collect()
}

// ============================================================================
// Chunk reassembly
// ============================================================================

#[test]
fn test_chunks_reassemble_regardless_of_arrival_order() {
    let size_source = |path: &Path| -> Result<Vec<Entity>, SourceError> {
        let bytes = std::fs::read(path).map_err(|source| SourceError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        Ok(vec![Entity::new(1, "Blob")
            .with_attribute("Size", AttributeValue::integer(bytes.len() as i64))
            .with_attribute("Text", AttributeValue::string(text))])
    };
    let (coordinator, dir) = coordinator(Arc::new(size_source));

    let parts: [&[u8]; 3] = [&[b'0'; 10], &[b'1'; 20], &[b'2'; 15]];
    let graph = upload_in_order(&coordinator, "scenario-a", &parts, &[2, 0, 1], GraphCaps::default());

    let node = &graph.nodes[0];
    assert_eq!(node.properties[0], ("Size".to_string(), Scalar::Integer(45)));
    let expected = format!("{}{}{}", "0".repeat(10), "1".repeat(20), "2".repeat(15));
    assert_eq!(node.properties[1], ("Text".to_string(), Scalar::String(expected)));
    assert!(files_under(dir.path()).is_empty());
}

#[test]
fn test_step_model_uploaded_in_chunks() {
    let text = step_file(&[
        "#10=IFCPROJECT('0001',$,'Tower',$,$,$,$,(#40),#50);",
        "#20=IFCSITE('0002',$,'Plot',$,$,#30,$,$,.ELEMENT.,(51,30,0),(-1,-15,0),12.5,$,$);",
        "#30=IFCLOCALPLACEMENT($,$);",
        "#40=IFCGEOMETRICREPRESENTATIONCONTEXT($,'Model',3,1.E-05,$,$);",
        "#50=IFCUNITASSIGNMENT((#60));",
        "#60=IFCSIUNIT(*,.LENGTHUNIT.,.MILLI.,.METRE.);",
    ]);
    let (coordinator, dir) = coordinator(Arc::new(StepEntitySource));
    let parts = split(&text, 4);
    let graph = upload_in_order(&coordinator, "tower.ifc", &parts, &[3, 1, 0, 2], GraphCaps::default());

    let ids: Vec<u64> = graph.nodes.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![10, 20, 30, 40, 50, 60]);
    assert_eq!(graph.nodes[0].label, "IfcProject");
    assert_eq!(graph.nodes[1].label, "IfcSite");
    assert!(graph.nodes[1]
        .properties
        .contains(&("RefElevation".to_string(), Scalar::Real(12.5))));

    let forward: Vec<(u64, u64, &str)> = graph.edges[..graph.summary.forward_edges]
        .iter()
        .map(|e| (e.source, e.target, e.label.as_str()))
        .collect();
    assert_eq!(
        forward,
        vec![
            (10, 40, "RepresentationContexts"),
            (10, 50, "UnitsInContext"),
            (20, 30, "ObjectPlacement"),
            (50, 60, "Units"),
        ]
    );
    assert!(files_under(dir.path()).is_empty());
}

// ============================================================================
// Caps
// ============================================================================

fn five_entity_model() -> String {
    step_file(&[
        "#1=IFCWALL('w1',$,'A',$,$,#5,$,$);",
        "#2=IFCWALL('w2',$,'B',$,$,#5,$,$);",
        "#3=IFCWALL('w3',$,'C',$,$,#5,$,$);",
        "#4=IFCWALL('w4',$,'D',$,$,#1,$,$);",
        "#5=IFCLOCALPLACEMENT($,$);",
    ])
}

#[test]
fn test_node_cap_keeps_lowest_ids() {
    let (coordinator, _dir) = coordinator(Arc::new(StepEntitySource));
    let text = five_entity_model();
    let graph = upload_in_order(&coordinator, "caps", &split(&text, 2), &[1, 0], GraphCaps::new(3, 100));

    let ids: Vec<u64> = graph.nodes.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert!(graph.summary.nodes_truncated);
    for edge in &graph.edges[..graph.summary.forward_edges] {
        assert!(edge.source <= 3, "edge sourced from truncated entity: {edge:?}");
    }
    // Targets past the cut are kept.
    assert!(graph.edges.iter().any(|e| e.target == 5));
}

#[test]
fn test_single_reference_yields_edge_pair() {
    let text = step_file(&[
        "#1=IFCWALL('w1',$,'A',$,$,#7,$,$);",
        "#7=IFCLOCALPLACEMENT($,$);",
    ]);
    let (coordinator, _dir) = coordinator(Arc::new(StepEntitySource));
    let graph = upload_in_order(&coordinator, "pair", &split(&text, 1), &[0], GraphCaps::default());

    let edges: Vec<(u64, u64, &str)> = graph
        .edges
        .iter()
        .map(|e| (e.source, e.target, e.label.as_str()))
        .collect();
    assert_eq!(
        edges,
        vec![(1, 7, "ObjectPlacement"), (7, 1, "back_ObjectPlacement")]
    );
}

#[test]
fn test_zero_relationship_cap_yields_no_edges() {
    let (coordinator, _dir) = coordinator(Arc::new(StepEntitySource));
    let text = five_entity_model();
    let graph = upload_in_order(&coordinator, "no-edges", &split(&text, 3), &[0, 1, 2], GraphCaps::new(100, 0));

    assert_eq!(graph.nodes.len(), 5);
    assert!(graph.edges.is_empty());
    assert!(graph.summary.relationships_truncated);
}

// ============================================================================
// Failure paths
// ============================================================================

#[test]
fn test_missing_file_id_has_no_side_effects() {
    let (coordinator, dir) = coordinator(Arc::new(StepEntitySource));
    let err = coordinator
        .accept_chunk(chunk("", 0, 1, b"ISO-10303-21;"), GraphCaps::default())
        .unwrap_err();

    assert!(matches!(err, UploadError::Validation(_)));
    assert_eq!(err.status_code(), 400);
    assert!(files_under(dir.path()).is_empty());
    assert_eq!(coordinator.active_sessions(), 0);
}

#[test]
fn test_unparseable_upload_is_extraction_error_and_cleaned_up() {
    let (coordinator, dir) = coordinator(Arc::new(StepEntitySource));
    let caps = GraphCaps::default();
    let text = step_file(&["#1=IFCWALL('w1',$,'A',$,$,#7,$,$"]);
    let parts = split(&text, 2);

    coordinator.accept_chunk(chunk("broken", 0, 2, parts[0]), caps).unwrap();
    let err = coordinator
        .accept_chunk(chunk("broken", 1, 2, parts[1]), caps)
        .unwrap_err();

    assert!(matches!(err, UploadError::Extraction(SourceError::Parse(_))), "{err}");
    assert_eq!(err.status_code(), 500);
    assert!(files_under(dir.path()).is_empty());
}

// ============================================================================
// Wire format
// ============================================================================

#[test]
fn test_graph_json_envelope() {
    let text = step_file(&[
        "#1=IFCWALL('w1',$,'A',$,$,#7,$,'T-1');",
        "#7=IFCLOCALPLACEMENT($,$);",
    ]);
    let dir = tempdir().unwrap();
    let path = dir.path().join("wall.ifc");
    std::fs::write(&path, text).unwrap();

    let entities = StepEntitySource.load(&path).unwrap();
    let graph = modelgraph_graph::extract(entities, GraphCaps::default());
    let json: serde_json::Value = serde_json::from_slice(&graph.to_json_vec().unwrap()).unwrap();

    assert_eq!(
        json["nodes"][0],
        serde_json::json!({
            "data": {"id": "1", "label": "IfcWall", "GlobalId": "w1", "Name": "A", "Tag": "T-1"}
        })
    );
    assert_eq!(
        json["edges"][1],
        serde_json::json!({
            "data": {"source": "7", "target": "1", "label": "back_ObjectPlacement"}
        })
    );
    assert!(json.get("summary").is_none());
}
