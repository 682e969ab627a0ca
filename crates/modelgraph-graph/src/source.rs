//! The seam between model parsers and the extraction core.

use std::path::Path;

use crate::entity::Entity;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read model file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("model file rejected: {0}")]
    Parse(String),
}

/// Opens a model file and yields its entities.
///
/// Implementations return entities in ascending id order; ids are unique
/// within one file.
pub trait EntitySource: Send + Sync {
    fn load(&self, path: &Path) -> Result<Vec<Entity>, SourceError>;
}

/// Source that ignores the path and returns a fixed entity set.
///
/// Useful for exercising the upload pipeline without a real parser.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    entities: Vec<Entity>,
}

impl InMemorySource {
    pub fn new(mut entities: Vec<Entity>) -> Self {
        entities.sort_by_key(|e| e.id);
        Self { entities }
    }
}

impl EntitySource for InMemorySource {
    fn load(&self, _path: &Path) -> Result<Vec<Entity>, SourceError> {
        Ok(self.entities.clone())
    }
}

impl<F> EntitySource for F
where
    F: Fn(&Path) -> Result<Vec<Entity>, SourceError> + Send + Sync,
{
    fn load(&self, path: &Path) -> Result<Vec<Entity>, SourceError> {
        self(path)
    }
}
