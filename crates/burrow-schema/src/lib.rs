//! Manifest model, artifact descriptors, and lock files for burrow.
//!
//! This crate defines the schema layer: TOML descriptor parsing into an
//! immutable [`Manifest`], the [`ResolvedArtifact`] record produced by package
//! providers (with its verifiable content id), and the [`LockFile`] that pins a
//! resolved environment to a deterministic identity.

pub mod artifact;
pub mod lock;
pub mod manifest;
pub mod types;

pub use artifact::{ArtifactError, EnvValue, ResolvedArtifact};
pub use lock::{EnvIdentity, LockError, LockFile, LockedInput};
pub use manifest::{
    parse_manifest_file, parse_manifest_str, ConflictError, EnvOverrides, InputRef, InputRole,
    Manifest, ManifestError,
};
pub use types::{ContentId, EnvId, ShortId};
