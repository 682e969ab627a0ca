//! Failure taxonomy for the upload pipeline.

use modelgraph_graph::SourceError;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Malformed or inconsistent request metadata. Nothing was written.
    #[error("{0}")]
    Validation(String),

    #[error("storage failure while {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("chunk {index} of upload '{session_id}' is missing")]
    MissingChunk { session_id: String, index: u32 },

    #[error("graph extraction failed: {0}")]
    Extraction(#[from] SourceError),

    #[error("payload of {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },
}

impl UploadError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// HTTP status the transport answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::PayloadTooLarge { .. } => 413,
            Self::Storage { .. } | Self::MissingChunk { .. } | Self::Extraction(_) => 500,
        }
    }
}
