//! On-disk staging for chunked uploads.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/chunks/<session_id>/chunk<index>     staged chunks
//! <root>/assembled/<session_id>-<uuid>.ifc    reassembled files
//! <root>/incoming/<uuid>.ifc                  whole-file uploads
//! ```
//!
//! Chunk writes land in a temporary file first and are renamed into place,
//! so a reader never sees a half-written `chunk<index>`.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use uuid::Uuid;

use crate::error::UploadError;

const CHUNKS_DIR: &str = "chunks";
const ASSEMBLED_DIR: &str = "assembled";
const INCOMING_DIR: &str = "incoming";
const CHUNK_PREFIX: &str = "chunk";
const TEMP_PREFIX: &str = ".partial-";
const MODEL_EXTENSION: &str = "ifc";

pub const MAX_SESSION_ID_LEN: usize = 128;

/// What a storage sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sessions: usize,
    pub files: usize,
}

#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let store = Self { root: root.into() };
        for dir in [CHUNKS_DIR, ASSEMBLED_DIR, INCOMING_DIR] {
            let path = store.root.join(dir);
            fs::create_dir_all(&path)
                .map_err(|e| UploadError::storage(format!("creating {}", path.display()), e))?;
        }
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject ids that could escape the staging directory.
    pub fn validate_session_id(session_id: &str) -> Result<(), UploadError> {
        if session_id.is_empty() {
            return Err(UploadError::validation("file id must not be empty"));
        }
        if session_id.len() > MAX_SESSION_ID_LEN {
            return Err(UploadError::validation(format!(
                "file id longer than {MAX_SESSION_ID_LEN} characters"
            )));
        }
        if session_id == "." || session_id == ".." {
            return Err(UploadError::validation("file id must not be '.' or '..'"));
        }
        if !session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(UploadError::validation(format!(
                "file id '{session_id}' may only contain letters, digits, '.', '_' and '-'"
            )));
        }
        Ok(())
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(CHUNKS_DIR).join(session_id)
    }

    fn chunk_path(&self, session_id: &str, index: u32) -> PathBuf {
        self.session_dir(session_id).join(format!("{CHUNK_PREFIX}{index}"))
    }

    /// Stage `bytes` as chunk `index`, replacing any earlier copy.
    pub fn put_chunk(
        &self,
        session_id: &str,
        index: u32,
        bytes: &[u8],
    ) -> Result<u64, UploadError> {
        Self::validate_session_id(session_id)?;
        let dir = self.session_dir(session_id);
        fs::create_dir_all(&dir)
            .map_err(|e| UploadError::storage(format!("creating {}", dir.display()), e))?;

        let temp = dir.join(format!("{TEMP_PREFIX}{index}-{}", Uuid::new_v4().simple()));
        let target = self.chunk_path(session_id, index);
        let written = fs::write(&temp, bytes).and_then(|()| fs::rename(&temp, &target));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp);
            return Err(UploadError::storage(
                format!("writing chunk {index} of '{session_id}'"),
                e,
            ));
        }

        tracing::debug!(session_id, chunk = index, bytes = bytes.len(), "staged chunk");
        Ok(bytes.len() as u64)
    }

    /// Number of distinct chunk indices staged for the session.
    pub fn count_received(&self, session_id: &str) -> Result<usize, UploadError> {
        let dir = self.session_dir(session_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(UploadError::storage(format!("listing {}", dir.display()), e))
            }
        };

        let mut count = 0;
        for entry in entries {
            let entry =
                entry.map_err(|e| UploadError::storage(format!("listing {}", dir.display()), e))?;
            if parse_chunk_index(&entry.file_name().to_string_lossy()).is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Concatenate chunks `0..total_chunks` into a fresh file and return its
    /// path. Nothing is left behind on failure.
    pub fn assemble(&self, session_id: &str, total_chunks: u32) -> Result<PathBuf, UploadError> {
        Self::validate_session_id(session_id)?;
        if let Some(index) =
            (0..total_chunks).find(|&i| !self.chunk_path(session_id, i).is_file())
        {
            return Err(UploadError::MissingChunk {
                session_id: session_id.to_string(),
                index,
            });
        }

        let output = self.root.join(ASSEMBLED_DIR).join(format!(
            "{session_id}-{}.{MODEL_EXTENSION}",
            Uuid::new_v4().simple()
        ));
        match self.concatenate(session_id, total_chunks, &output) {
            Ok(bytes) => {
                tracing::debug!(
                    session_id,
                    chunks = total_chunks,
                    bytes,
                    path = %output.display(),
                    "assembled upload"
                );
                Ok(output)
            }
            Err(e) => {
                let _ = fs::remove_file(&output);
                Err(e)
            }
        }
    }

    fn concatenate(
        &self,
        session_id: &str,
        total_chunks: u32,
        output: &Path,
    ) -> Result<u64, UploadError> {
        let file = File::create(output)
            .map_err(|e| UploadError::storage(format!("creating {}", output.display()), e))?;
        let mut writer = BufWriter::new(file);
        let mut total = 0u64;

        for index in 0..total_chunks {
            let path = self.chunk_path(session_id, index);
            let mut chunk = match File::open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(UploadError::MissingChunk {
                        session_id: session_id.to_string(),
                        index,
                    })
                }
                Err(e) => {
                    return Err(UploadError::storage(format!("reading {}", path.display()), e))
                }
            };
            total += io::copy(&mut chunk, &mut writer)
                .map_err(|e| UploadError::storage(format!("appending chunk {index}"), e))?;
        }

        writer
            .flush()
            .map_err(|e| UploadError::storage(format!("writing {}", output.display()), e))?;
        Ok(total)
    }

    /// Remove every staged chunk of the session. Idempotent.
    pub fn cleanup_chunks(&self, session_id: &str) -> Result<(), UploadError> {
        Self::validate_session_id(session_id)?;
        let dir = self.session_dir(session_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UploadError::storage(format!("removing {}", dir.display()), e)),
        }
    }

    /// Remove an assembled or incoming file. Idempotent.
    pub fn remove_file(&self, path: &Path) -> Result<(), UploadError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(UploadError::storage(format!("removing {}", path.display()), e)),
        }
    }

    /// Fresh path for a whole-file upload.
    pub fn incoming_path(&self) -> PathBuf {
        self.root
            .join(INCOMING_DIR)
            .join(format!("{}.{MODEL_EXTENSION}", Uuid::new_v4().simple()))
    }

    /// Delete staging directories and stray files untouched for longer than
    /// `ttl`.
    pub fn sweep_expired(&self, ttl: Duration) -> Result<SweepReport, UploadError> {
        let now = SystemTime::now();
        let mut report = SweepReport::default();

        for entry in self.list(CHUNKS_DIR)? {
            if !is_expired(&entry, now, ttl) {
                continue;
            }
            let path = entry.path();
            match fs::remove_dir_all(&path) {
                Ok(()) => report.sessions += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to sweep session");
                }
            }
        }

        for dir in [ASSEMBLED_DIR, INCOMING_DIR] {
            for entry in self.list(dir)? {
                if !is_expired(&entry, now, ttl) {
                    continue;
                }
                let path = entry.path();
                match fs::remove_file(&path) {
                    Ok(()) => report.files += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "failed to sweep file");
                    }
                }
            }
        }

        Ok(report)
    }

    fn list(&self, dir: &str) -> Result<Vec<fs::DirEntry>, UploadError> {
        let path = self.root.join(dir);
        let entries = match fs::read_dir(&path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(UploadError::storage(format!("listing {}", path.display()), e)),
        };
        entries
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| UploadError::storage(format!("listing {}", path.display()), e))
    }
}

fn parse_chunk_index(name: &str) -> Option<u32> {
    name.strip_prefix(CHUNK_PREFIX)?.parse().ok()
}

fn is_expired(entry: &fs::DirEntry, now: SystemTime, ttl: Duration) -> bool {
    entry
        .metadata()
        .and_then(|m| m.modified())
        .map(|modified| now.duration_since(modified).unwrap_or_default() > ttl)
        .unwrap_or(false)
}
