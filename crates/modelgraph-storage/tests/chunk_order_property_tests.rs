use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use modelgraph_graph::{AttributeValue, Entity, GraphCaps, Scalar, SourceError};
use modelgraph_storage::{
    ChunkOutcome, ChunkStore, ChunkUpload, UploadCoordinator, DEFAULT_SESSION_TTL,
};
use proptest::prelude::*;

/// Chunk payloads plus a permutation of their indices.
fn chunks_and_order() -> impl Strategy<Value = (Vec<Vec<u8>>, Vec<usize>)> {
    prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..12).prop_flat_map(
        |chunks| {
            let order: Vec<usize> = (0..chunks.len()).collect();
            (Just(chunks), Just(order).prop_shuffle())
        },
    )
}

/// Reports the assembled file's bytes as a hex string attribute.
fn echo_source(path: &Path) -> Result<Vec<Entity>, SourceError> {
    let bytes = std::fs::read(path).map_err(|source| SourceError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    Ok(vec![Entity::new(1, "Echo").with_attribute("Bytes", AttributeValue::string(hex))])
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn any_submission_order_reassembles_by_index((chunks, order) in chunks_and_order()) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path()).unwrap();
        let coordinator = UploadCoordinator::new(store, Arc::new(echo_source), DEFAULT_SESSION_TTL);
        let total = chunks.len() as u32;

        let mut graph = None;
        for (position, &index) in order.iter().enumerate() {
            let outcome = coordinator
                .accept_chunk(
                    ChunkUpload {
                        session_id: "prop".to_string(),
                        index: index as u32,
                        total_chunks: total,
                        bytes: Bytes::from(chunks[index].clone()),
                    },
                    GraphCaps::default(),
                )
                .unwrap();
            match outcome {
                ChunkOutcome::Received { .. } => prop_assert!(position + 1 < order.len()),
                ChunkOutcome::Completed(g) => {
                    prop_assert_eq!(position + 1, order.len());
                    graph = Some(g);
                }
            }
        }

        let graph = graph.expect("last chunk completes the upload");
        let expected: String = chunks.concat().iter().map(|b| format!("{b:02x}")).collect();
        prop_assert_eq!(
            &graph.nodes[0].properties,
            &vec![("Bytes".to_string(), Scalar::String(expected))]
        );
    }
}
