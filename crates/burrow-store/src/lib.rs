//! Content-addressed artifact cache and on-disk layout for burrow.
//!
//! Resolved artifacts are stored as JSON records named by their verified
//! content id. Writes go through a temp file and an atomic rename, so
//! concurrent writers of the same artifact cannot corrupt the cache and no
//! store-wide lock is needed. An index maps `(name, constraint)` to the content
//! id last resolved for it, which is what makes warm resolution possible.

pub mod cache;
pub mod integrity;
pub mod layout;

pub use cache::{ArtifactCache, IndexEntry};
pub use integrity::{prune_cache, verify_cache, IntegrityFailure, IntegrityReport, PruneReport};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for artifact '{id}': expected {expected}, got {actual}")]
    IntegrityFailure {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
