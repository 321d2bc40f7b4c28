use crate::concurrency::CancelToken;
use crate::config::Config;
use crate::lifecycle::{validate_transition, ActivationState};
use crate::resolver::{ResolveOptions, Resolver};
use crate::CoreError;
use burrow_runtime::{
    compose, select_provider, ActivationHandle, Activator, ComposedEnvironment, PackageProvider,
    Resolution,
};
use burrow_schema::{parse_manifest_file, LockFile, Manifest, ResolvedArtifact};
use burrow_store::{
    prune_cache, verify_cache, ArtifactCache, IntegrityReport, PruneReport, StoreLayout,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Entry point tying a store and a package provider together.
///
/// An engine is cheap to share: each manifest gets its own [`Session`].
pub struct Engine {
    layout: StoreLayout,
    cache: ArtifactCache,
    provider: Arc<dyn PackageProvider>,
    options: ResolveOptions,
    cancel: CancelToken,
}

impl Engine {
    /// Create an engine over the store at `store_root`, initializing the
    /// cache directories if needed.
    pub fn new(
        store_root: impl Into<PathBuf>,
        provider: Arc<dyn PackageProvider>,
    ) -> Result<Self, CoreError> {
        let layout = StoreLayout::new(store_root);
        layout.initialize()?;
        let cache = ArtifactCache::new(layout.clone());
        debug!(
            "engine over {} with provider '{}'",
            layout.root().display(),
            provider.name()
        );
        Ok(Self {
            layout,
            cache,
            provider,
            options: ResolveOptions::default(),
            cancel: CancelToken::new(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, CoreError> {
        let provider = select_provider(config.provider(), &config.registry_root())?;
        let engine = Self::new(config.store_root(), provider)?;
        Ok(engine.with_options(ResolveOptions {
            workers: config.workers(),
            timeout: config.timeout(),
            refresh: false,
        }))
    }

    #[must_use]
    pub fn with_options(mut self, options: ResolveOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut ResolveOptions {
        &mut self.options
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn resolver(&self) -> Resolver {
        Resolver::new(Arc::clone(&self.provider), self.cache.clone())
            .with_options(self.options)
            .with_cancel_token(self.cancel.clone())
    }

    pub fn session(&self, manifest: Manifest) -> Session<'_> {
        Session::new(self, manifest)
    }

    pub fn load(&self, manifest_path: &Path) -> Result<Session<'_>, CoreError> {
        info!("loading manifest {}", manifest_path.display());
        let manifest = parse_manifest_file(manifest_path)?;
        Ok(self.session(manifest))
    }

    /// Every cached artifact that still verifies.
    pub fn cached_artifacts(&self) -> Result<Vec<ResolvedArtifact>, CoreError> {
        let mut out = Vec::new();
        for id in self.cache.list()? {
            out.push(self.cache.get(&id)?);
        }
        out.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
        Ok(out)
    }

    pub fn verify_cache(&self) -> Result<IntegrityReport, CoreError> {
        Ok(verify_cache(&self.layout)?)
    }

    pub fn prune_cache(&self) -> Result<PruneReport, CoreError> {
        Ok(prune_cache(&self.layout)?)
    }
}

/// One manifest's single pass from declaration to an active environment.
///
/// A session only moves forward. Once it has failed, or once it has been
/// activated, it cannot be activated again.
pub struct Session<'e> {
    engine: &'e Engine,
    manifest: Manifest,
    state: ActivationState,
    resolution: Option<Resolution>,
    composed: Option<ComposedEnvironment>,
}

impl<'e> Session<'e> {
    fn new(engine: &'e Engine, manifest: Manifest) -> Self {
        Self {
            engine,
            manifest,
            state: ActivationState::Unresolved,
            resolution: None,
            composed: None,
        }
    }

    pub fn state(&self) -> ActivationState {
        self.state
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    pub fn composed(&self) -> Option<&ComposedEnvironment> {
        self.composed.as_ref()
    }

    fn transition(&mut self, to: ActivationState) -> Result<(), CoreError> {
        validate_transition(self.state, to)?;
        debug!("session '{}': {} -> {to}", self.manifest.name(), self.state);
        self.state = to;
        Ok(())
    }

    fn fail(&mut self, err: impl Into<CoreError>) -> CoreError {
        let err = err.into();
        if validate_transition(self.state, ActivationState::Failed).is_ok() {
            self.state = ActivationState::Failed;
        }
        info!("session '{}' failed: {err}", self.manifest.name());
        err
    }

    pub fn resolve(&mut self) -> Result<&Resolution, CoreError> {
        self.transition(ActivationState::Resolving)?;
        let result = self.engine.resolver().resolve(&self.manifest);
        match result {
            Ok(resolution) => {
                self.transition(ActivationState::Resolved)?;
                Ok(self.resolution.insert(resolution))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Resolve and check the result against `lock`. Any difference between
    /// the lock, the manifest and the fresh resolution fails the session.
    pub fn resolve_locked(&mut self, lock: &LockFile) -> Result<&Resolution, CoreError> {
        self.transition(ActivationState::Resolving)?;

        let checked = lock
            .verify_integrity()
            .and_then(|_| lock.verify_manifest_intent(&self.manifest));
        if let Err(e) = checked {
            return Err(self.fail(e));
        }

        let result = self.engine.resolver().resolve(&self.manifest);
        let resolution = match result {
            Ok(r) => r,
            Err(e) => return Err(self.fail(e)),
        };
        if let Err(e) = lock.verify_resolved(&resolution.locked_inputs()) {
            return Err(self.fail(e));
        }

        self.transition(ActivationState::Resolved)?;
        Ok(self.resolution.insert(resolution))
    }

    /// The lock file describing the current resolution, if there is one.
    pub fn lock_file(&self) -> Option<LockFile> {
        self.resolution
            .as_ref()
            .map(|r| LockFile::from_resolved(&self.manifest, r.locked_inputs()))
    }

    pub fn compose(
        &mut self,
        base: BTreeMap<String, String>,
    ) -> Result<&ComposedEnvironment, CoreError> {
        self.transition(ActivationState::Composing)?;
        let Some(resolution) = &self.resolution else {
            return Err(self.fail(CoreError::InvalidTransition {
                from: "composing".to_owned(),
                to: "composed".to_owned(),
            }));
        };
        let composed = compose(resolution, self.manifest.env_overrides(), base);
        self.transition(ActivationState::Composed)?;
        Ok(self.composed.insert(composed))
    }

    /// Resolve (unless already done) and compose over `base`.
    pub fn prepare(
        &mut self,
        base: BTreeMap<String, String>,
    ) -> Result<&ComposedEnvironment, CoreError> {
        if self.state == ActivationState::Unresolved {
            self.resolve()?;
        }
        self.compose(base)
    }

    /// Materialize the composed environment. Allowed once per session.
    pub fn activate(&mut self, activator: &Activator) -> Result<ActivationHandle, CoreError> {
        validate_transition(self.state, ActivationState::Active)?;
        let Some(composed) = &self.composed else {
            return Err(CoreError::InvalidTransition {
                from: self.state.to_string(),
                to: ActivationState::Active.to_string(),
            });
        };
        let handle = activator.activate(composed)?;
        self.transition(ActivationState::Active)?;
        info!("session '{}' active", self.manifest.name());
        Ok(handle)
    }

    /// Tear the activation down and close the session.
    pub fn deactivate(&mut self, mut handle: ActivationHandle) -> Result<(), CoreError> {
        handle.teardown();
        self.transition(ActivationState::Deactivated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_runtime::{ActivationMode, MockProvider, ScriptFormat, ScriptTarget};
    use burrow_schema::parse_manifest_str;

    fn engine(provider: MockProvider) -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(dir.path().join("store"), Arc::new(provider)).unwrap();
        (dir, engine)
    }

    fn manifest(body: &str) -> Manifest {
        parse_manifest_str(&format!("name = \"demo\"\n{body}")).unwrap()
    }

    fn memory_script() -> Activator {
        Activator::new(ActivationMode::Script {
            format: ScriptFormat::Posix,
            target: ScriptTarget::Memory,
            deactivate: false,
        })
    }

    #[test]
    fn session_walks_the_whole_lifecycle() {
        let (_dir, engine) = engine(MockProvider::new());
        let mut session = engine.session(manifest("build_inputs = [\"rustc\"]"));
        assert_eq!(session.state(), ActivationState::Unresolved);

        session.resolve().unwrap();
        assert_eq!(session.state(), ActivationState::Resolved);
        session.compose(BTreeMap::new()).unwrap();
        assert_eq!(session.state(), ActivationState::Composed);

        let handle = session.activate(&memory_script()).unwrap();
        assert_eq!(session.state(), ActivationState::Active);
        assert!(matches!(
            session.activate(&memory_script()),
            Err(CoreError::InvalidTransition { .. })
        ));

        session.deactivate(handle).unwrap();
        assert_eq!(session.state(), ActivationState::Deactivated);
    }

    #[test]
    fn failed_resolution_blocks_activation() {
        let (_dir, engine) = engine(MockProvider::new().with_missing("ghost"));
        let mut session = engine.session(manifest("build_inputs = [\"ghost\"]"));
        let err = session.resolve().unwrap_err();
        assert!(matches!(err, CoreError::Resolution(_)));
        assert_eq!(session.state(), ActivationState::Failed);
        assert!(session.compose(BTreeMap::new()).is_err());
        assert!(session.activate(&memory_script()).is_err());
        assert_eq!(session.state(), ActivationState::Failed);
    }

    #[test]
    fn activation_requires_composition() {
        let (_dir, engine) = engine(MockProvider::new());
        let mut session = engine.session(manifest("build_inputs = [\"rustc\"]"));
        session.resolve().unwrap();
        assert!(session.activate(&memory_script()).is_err());
        assert_eq!(session.state(), ActivationState::Resolved);
    }

    #[test]
    fn locked_resolution_detects_drift() {
        let (_dir, engine) = engine(MockProvider::new());
        let m = manifest("build_inputs = [\"rustc@1.75.0\"]");
        let mut first = engine.session(m.clone());
        first.resolve().unwrap();
        let mut lock = first.lock_file().unwrap();

        let mut again = engine.session(m.clone());
        again.resolve_locked(&lock).unwrap();
        assert_eq!(again.state(), ActivationState::Resolved);

        lock.inputs[0].content_id = burrow_schema::ContentId::new("f".repeat(64));
        let lock = LockFile::from_resolved(&m, lock.inputs);
        let mut drifted = engine.session(m);
        let err = drifted.resolve_locked(&lock).unwrap_err();
        assert!(matches!(err, CoreError::Lock(burrow_schema::LockError::Drift(_))));
        assert_eq!(drifted.state(), ActivationState::Failed);
    }

    #[test]
    fn cache_listing_reflects_resolutions() {
        let (_dir, engine) = engine(MockProvider::new());
        let mut session = engine.session(manifest(
            "build_inputs = [\"rustc\", \"cargo\"]\nlink_inputs = [\"openssl\"]",
        ));
        session.resolve().unwrap();
        let names: Vec<_> = engine
            .cached_artifacts()
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, ["cargo", "openssl", "rustc"]);
        assert!(engine.verify_cache().unwrap().failed.is_empty());
    }
}
