//! Chunk-driven upload state machine.
//!
//! Each session moves `Receiving -> Complete` exactly once. The transition
//! is decided under the session's own mutex, taken from a sharded registry,
//! so unrelated uploads never wait on each other. The request that performs
//! the transition owns assembly, chunk cleanup and extraction; every other
//! request for the session only ever reports its chunk as received.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use modelgraph_graph::{extract, EntitySource, Graph, GraphCaps};
use parking_lot::Mutex;

use crate::chunk_store::{ChunkStore, SweepReport};
use crate::error::UploadError;

/// Default idle time before an unfinished session is reaped.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(600);

// ============================================================================
// Requests and outcomes
// ============================================================================

/// One inbound chunk with its metadata.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub session_id: String,
    pub index: u32,
    pub total_chunks: u32,
    pub bytes: Bytes,
}

#[derive(Debug)]
pub enum ChunkOutcome {
    /// Stored; the session is still waiting for more chunks (or another
    /// request is completing it).
    Received { index: u32 },
    /// This chunk completed the upload.
    Completed(Graph),
}

/// What a reaper pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub sessions: usize,
    pub swept: SweepReport,
}

// ============================================================================
// Session registry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Receiving,
    Complete,
}

#[derive(Debug)]
struct SessionEntry {
    total_chunks: u32,
    phase: Phase,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl SessionEntry {
    fn new(total_chunks: u32) -> Self {
        let now = Utc::now();
        Self {
            total_chunks,
            phase: Phase::Receiving,
            created_at: now,
            last_activity: now,
        }
    }

    fn is_idle(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        // A clock step backwards yields a negative delta; treat it as fresh.
        (now - self.last_activity)
            .to_std()
            .map(|idle| idle > ttl)
            .unwrap_or(false)
    }
}

type SessionHandle = Arc<Mutex<SessionEntry>>;

// ============================================================================
// Coordinator
// ============================================================================

pub struct UploadCoordinator {
    store: ChunkStore,
    source: Arc<dyn EntitySource>,
    sessions: DashMap<String, SessionHandle>,
    session_ttl: Duration,
}

impl UploadCoordinator {
    /// `session_ttl` of zero disables reaping.
    pub fn new(store: ChunkStore, source: Arc<dyn EntitySource>, session_ttl: Duration) -> Self {
        Self {
            store,
            source,
            sessions: DashMap::new(),
            session_ttl,
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Number of sessions still receiving chunks.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Stage one chunk; the chunk that makes the upload complete also
    /// assembles, cleans up and extracts.
    pub fn accept_chunk(
        &self,
        upload: ChunkUpload,
        caps: GraphCaps,
    ) -> Result<ChunkOutcome, UploadError> {
        let ChunkUpload {
            session_id,
            index,
            total_chunks,
            bytes,
        } = upload;

        ChunkStore::validate_session_id(&session_id)?;
        if total_chunks == 0 {
            return Err(UploadError::validation("total-chunks must be at least 1"));
        }
        if index >= total_chunks {
            return Err(UploadError::validation(format!(
                "chunk-number {index} is out of range for {total_chunks} chunks"
            )));
        }

        let handle = self.session(&session_id, total_chunks);
        {
            let mut session = handle.lock();
            if session.total_chunks != total_chunks {
                return Err(UploadError::validation(format!(
                    "upload '{session_id}' was started with {} chunks, not {total_chunks}",
                    session.total_chunks
                )));
            }
            if session.phase == Phase::Complete {
                // Lost the race against the completing request.
                return Ok(ChunkOutcome::Received { index });
            }

            self.store.put_chunk(&session_id, index, &bytes)?;
            session.last_activity = Utc::now();
            tracing::info!(
                session_id = %session_id,
                chunk = index,
                total = total_chunks,
                bytes = bytes.len(),
                "chunk received"
            );

            if self.store.count_received(&session_id)? < total_chunks as usize {
                return Ok(ChunkOutcome::Received { index });
            }
            session.phase = Phase::Complete;
            tracing::info!(
                session_id = %session_id,
                chunks = total_chunks,
                elapsed_ms = (Utc::now() - session.created_at).num_milliseconds(),
                "upload complete"
            );
        }

        // Chunks arriving until the entry is gone see the completed session,
        // so nothing new is staged into the directory being cleaned up.
        let assembled = self.store.assemble(&session_id, total_chunks);
        if let Err(e) = self.store.cleanup_chunks(&session_id) {
            tracing::warn!(session_id = %session_id, error = %e, "failed to remove staged chunks");
        }
        self.sessions
            .remove_if(&session_id, |_, current| Arc::ptr_eq(current, &handle));

        let graph = self.extract_file(assembled?, caps)?;
        Ok(ChunkOutcome::Completed(graph))
    }

    /// Extract a fully written whole-file upload. The file is removed
    /// afterwards whatever the outcome.
    pub fn process_file(&self, path: PathBuf, caps: GraphCaps) -> Result<Graph, UploadError> {
        self.extract_file(path, caps)
    }

    fn extract_file(&self, path: PathBuf, caps: GraphCaps) -> Result<Graph, UploadError> {
        let guard = RemoveOnDrop {
            store: &self.store,
            path,
        };
        let entities = self.source.load(&guard.path).map_err(|e| {
            tracing::warn!(path = %guard.path.display(), error = %e, "entity source rejected upload");
            UploadError::from(e)
        })?;
        let graph = extract(entities, caps);
        tracing::info!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            entities = graph.summary.entities_total,
            "graph extracted"
        );
        Ok(graph)
    }

    fn session(&self, session_id: &str, total_chunks: u32) -> SessionHandle {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SessionEntry::new(total_chunks))))
            .value()
            .clone()
    }

    /// Drop sessions idle longer than the TTL, then sweep storage left
    /// behind by requests that never reached the registry (or a restart).
    pub fn reap_expired(&self) -> Result<ReapReport, UploadError> {
        if self.session_ttl.is_zero() {
            return Ok(ReapReport::default());
        }
        let now = Utc::now();
        let candidates: Vec<(String, SessionHandle)> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut report = ReapReport::default();
        for (session_id, handle) in candidates {
            {
                let session = handle.lock();
                if session.phase != Phase::Receiving || !session.is_idle(now, self.session_ttl) {
                    continue;
                }
                self.store.cleanup_chunks(&session_id)?;
            }
            if self
                .sessions
                .remove_if(&session_id, |_, current| Arc::ptr_eq(current, &handle))
                .is_some()
            {
                report.sessions += 1;
                tracing::info!(session_id = %session_id, "reaped abandoned upload");
            }
        }

        report.swept = self.store.sweep_expired(self.session_ttl)?;
        if report.swept != SweepReport::default() {
            tracing::info!(
                sessions = report.swept.sessions,
                files = report.swept.files,
                "swept stale upload storage"
            );
        }
        Ok(report)
    }
}

/// Deletes an assembled or incoming file when extraction ends, including by
/// panic.
struct RemoveOnDrop<'a> {
    store: &'a ChunkStore,
    path: PathBuf,
}

impl Drop for RemoveOnDrop<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove upload file");
        }
    }
}
