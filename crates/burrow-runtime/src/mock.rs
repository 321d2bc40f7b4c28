use crate::provider::PackageProvider;
use crate::RuntimeError;
use burrow_schema::{ContentId, EnvValue, InputRef, ResolvedArtifact};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const MOCK_VERSION: &str = "0.0.0-mock";

/// Provider that resolves every name to a deterministic synthetic artifact.
///
/// Tests can pin specific artifacts, mark names as missing or corrupt, and
/// slow individual lookups down.
#[derive(Default)]
pub struct MockProvider {
    pinned: HashMap<String, ResolvedArtifact>,
    missing: HashSet<String>,
    corrupt: HashSet<String>,
    delays: HashMap<String, Duration>,
    lookups: AtomicUsize,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_artifact(self, artifact: ResolvedArtifact) -> Self {
        let name = artifact.name.clone();
        self.with_artifact_for(&name, artifact)
    }

    /// Answer lookups of `input_name` with `artifact`, whatever its own name.
    #[must_use]
    pub fn with_artifact_for(mut self, input_name: &str, artifact: ResolvedArtifact) -> Self {
        self.pinned.insert(input_name.to_owned(), artifact);
        self
    }

    #[must_use]
    pub fn with_missing(mut self, name: &str) -> Self {
        self.missing.insert(name.to_owned());
        self
    }

    /// Return an artifact whose content id does not match its description.
    #[must_use]
    pub fn with_corrupt(mut self, name: &str) -> Self {
        self.corrupt.insert(name.to_owned());
        self
    }

    #[must_use]
    pub fn with_delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.to_owned(), delay);
        self
    }

    /// Number of lookups served so far.
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// The artifact a plain lookup of `input` produces.
    pub fn synthesize(input: &InputRef) -> ResolvedArtifact {
        let version = input.version().unwrap_or(MOCK_VERSION);
        let install = format!("/mock/store/{}-{version}", input.name());
        let mut env = BTreeMap::new();
        env.insert("PATH".to_owned(), EnvValue::paths([format!("{install}/bin")]));
        ResolvedArtifact::new(input.name(), version, install, env)
    }
}

impl PackageProvider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn lookup(&self, input: &InputRef) -> Result<Option<ResolvedArtifact>, RuntimeError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(input.name()) {
            std::thread::sleep(*delay);
        }
        if self.missing.contains(input.name()) {
            return Ok(None);
        }

        let mut artifact = self
            .pinned
            .get(input.name())
            .cloned()
            .unwrap_or_else(|| Self::synthesize(input));

        if self.corrupt.contains(input.name()) {
            artifact.content_id = ContentId::new("0".repeat(64));
        }
        Ok(Some(artifact))
    }
}
