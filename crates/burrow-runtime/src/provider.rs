use crate::RuntimeError;
use burrow_schema::{InputRef, ResolvedArtifact};
use std::path::Path;
use std::sync::Arc;

/// The external package-build collaborator.
///
/// Implementations must be idempotent and free of side effects visible to
/// burrow: the same input always yields the same artifact (or none).
pub trait PackageProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Find an artifact matching the input's name and version constraint.
    /// `Ok(None)` means "not found"; errors are provider failures.
    fn lookup(&self, input: &InputRef) -> Result<Option<ResolvedArtifact>, RuntimeError>;
}

pub fn select_provider(
    kind: &str,
    registry_root: &Path,
) -> Result<Arc<dyn PackageProvider>, RuntimeError> {
    match kind {
        "registry" => Ok(Arc::new(crate::registry::RegistryProvider::new(
            registry_root,
        ))),
        "mock" => Ok(Arc::new(crate::mock::MockProvider::new())),
        other => Err(RuntimeError::ProviderUnavailable(other.to_owned())),
    }
}
