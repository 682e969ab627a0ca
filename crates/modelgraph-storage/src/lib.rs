//! Upload staging and assembly for modelgraph
//!
//! ```text
//!   chunk ──► UploadCoordinator ──► ChunkStore (chunks/<session>/chunk<n>)
//!                   │                     │
//!                   │ all chunks present  ▼
//!                   └──────────────► assemble ──► EntitySource ──► extract
//!                                         │                           │
//!                                         └──── cleanup (always) ◄────┘
//! ```
//!
//! - [`ChunkStore`]: per-session staging directories under an injected root.
//! - [`UploadCoordinator`]: detects completion exactly once per session,
//!   reassembles, extracts, and reclaims storage on every path.
//! - [`UploadError`]: the failure taxonomy the transport maps to responses.

pub mod chunk_store;
pub mod coordinator;
pub mod error;


pub use chunk_store::{ChunkStore, SweepReport};
pub use coordinator::{ChunkOutcome, ChunkUpload, ReapReport, UploadCoordinator, DEFAULT_SESSION_TTL};
pub use error::UploadError;
