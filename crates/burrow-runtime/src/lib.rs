//! Package providers, environment composition, and activation for burrow.
//!
//! This crate implements the execution layer: the pluggable
//! [`PackageProvider`] seam to the external package-build system (with a
//! filesystem registry and a mock implementation), the deterministic
//! [`compose`] merge of artifact exports and manifest overrides, script
//! rendering, and the [`Activator`] that materializes a composed environment
//! into a child process or a sourceable script.

pub mod activate;
pub mod compose;
pub mod mock;
pub mod provider;
pub mod registry;
pub mod resolution;
pub mod script;

pub use activate::{ActivationHandle, ActivationMode, Activator, EmittedScript, ScriptTarget};
pub use compose::{compose, inherited_environment, ComposedEnvironment, PATH_SEPARATOR};
pub use mock::MockProvider;
pub use provider::{select_provider, PackageProvider};
pub use registry::{RegistryProvider, DESCRIPTOR_FILE};
pub use resolution::{Resolution, ResolvedInput};
pub use script::ScriptFormat;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("package provider '{0}' is not available")]
    ProviderUnavailable(String),
    #[error("invalid artifact descriptor {}: {reason}", path.display())]
    InvalidDescriptor { path: PathBuf, reason: String },
    #[error("lookup of '{input}' failed: {reason}")]
    LookupFailed { input: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ActivationError {
    #[error("activation I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("variable name '{0}' cannot be exported")]
    InvalidVariable(String),
    #[error("unknown script format '{0}', expected 'posix' or 'fish'")]
    UnknownFormat(String),
    #[error("process is not attached to this handle")]
    NotAProcess,
}
