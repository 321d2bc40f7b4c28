use crate::manifest::{InputRef, InputRole, Manifest};
use crate::types::{ContentId, EnvId, ShortId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub const LOCK_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock file parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("lock file serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("unsupported lock_version {0}, expected {LOCK_VERSION}")]
    UnsupportedVersion(u32),
    #[error("lock file env_id mismatch: lock has '{lock_id}', recomputed '{computed_id}'")]
    EnvIdMismatch { lock_id: String, computed_id: String },
    #[error("lock file pins '{name}' to malformed content id '{id}'")]
    MalformedContentId { name: String, id: String },
    #[error("lock file drift: {0}")]
    Drift(String),
}

/// Deterministic identity of a locked environment.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvIdentity {
    pub env_id: EnvId,
    pub short_id: ShortId,
}

/// One declaration pinned to the artifact it resolved to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockedInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<String>,
    pub role: InputRole,
    pub version: String,
    pub content_id: ContentId,
}

impl LockedInput {
    fn declared(&self) -> InputRef {
        InputRef::new(&self.name, self.constraint.as_deref())
    }
}

/// The lock file captures the fully resolved state of an environment.
///
/// The env_id is computed from the locked fields only, so the same lock
/// always yields the same identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockFile {
    pub lock_version: u32,
    pub env_id: String,
    pub short_id: String,
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<LockedInput>,
    #[serde(default)]
    pub env_overrides: BTreeMap<String, String>,
}

impl LockFile {
    /// Lock a manifest against its resolved inputs (build entries first, then link).
    pub fn from_resolved(manifest: &Manifest, inputs: Vec<LockedInput>) -> Self {
        let lock = LockFile {
            lock_version: LOCK_VERSION,
            env_id: String::new(),
            short_id: String::new(),
            name: manifest.name().to_owned(),
            inputs,
            env_overrides: manifest
                .env_overrides()
                .iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        };

        let identity = lock.compute_identity();
        LockFile {
            env_id: identity.env_id.into_inner(),
            short_id: identity.short_id.into_inner(),
            ..lock
        }
    }

    pub fn compute_identity(&self) -> EnvIdentity {
        let mut hasher = blake3::Hasher::new();

        hasher.update(format!("name:{}\n", self.name).as_bytes());

        // Declaration order is significant: it drives composition precedence.
        for input in &self.inputs {
            hasher.update(
                format!(
                    "input:{:?}:{}:{}:{}\n",
                    input.role,
                    input.name,
                    input.constraint.as_deref().unwrap_or("*"),
                    input.content_id
                )
                .as_bytes(),
            );
        }

        for (key, value) in &self.env_overrides {
            hasher.update(format!("env:{key}={value}\n").as_bytes());
        }

        let env_id = EnvId::from(hasher.finalize());
        let short_id = ShortId::new(env_id.short());
        EnvIdentity { env_id, short_id }
    }

    /// Verify that the stored env_id matches the recomputed one.
    pub fn verify_integrity(&self) -> Result<EnvIdentity, LockError> {
        if self.lock_version != LOCK_VERSION {
            return Err(LockError::UnsupportedVersion(self.lock_version));
        }
        if let Some(bad) = self.inputs.iter().find(|i| !i.content_id.is_digest()) {
            return Err(LockError::MalformedContentId {
                name: bad.name.clone(),
                id: bad.content_id.to_string(),
            });
        }
        let identity = self.compute_identity();
        if self.env_id != identity.env_id.as_str() {
            return Err(LockError::EnvIdMismatch {
                lock_id: self.env_id.clone(),
                computed_id: identity.env_id.into_inner(),
            });
        }
        Ok(identity)
    }

    /// Check that the manifest still declares what this lock was made from.
    pub fn verify_manifest_intent(&self, manifest: &Manifest) -> Result<(), LockError> {
        if self.name != manifest.name() {
            return Err(LockError::Drift(format!(
                "name changed: lock has '{}', manifest has '{}'",
                self.name,
                manifest.name()
            )));
        }

        let declared: Vec<(InputRole, InputRef)> = manifest
            .inputs()
            .map(|(role, input)| (role, input.clone()))
            .collect();
        let locked: Vec<(InputRole, InputRef)> = self
            .inputs
            .iter()
            .map(|i| (i.role, i.declared()))
            .collect();
        if declared != locked {
            return Err(LockError::Drift(
                "declared inputs changed since the lock was written; run 'burrow resolve' to re-lock"
                    .to_owned(),
            ));
        }

        let overrides: BTreeMap<String, String> = manifest
            .env_overrides()
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        if overrides != self.env_overrides {
            return Err(LockError::Drift(
                "environment overrides changed since the lock was written".to_owned(),
            ));
        }

        Ok(())
    }

    /// Check freshly resolved inputs against the pinned content ids.
    pub fn verify_resolved(&self, resolved: &[LockedInput]) -> Result<(), LockError> {
        for pinned in &self.inputs {
            let Some(actual) = resolved
                .iter()
                .find(|r| r.role == pinned.role && r.name == pinned.name)
            else {
                return Err(LockError::Drift(format!(
                    "'{}' is locked but was not resolved",
                    pinned.name
                )));
            };
            if actual.content_id != pinned.content_id {
                return Err(LockError::Drift(format!(
                    "'{}' resolved to {} ({}), lock pins {} ({})",
                    pinned.name,
                    actual.content_id.short(),
                    actual.version,
                    pinned.content_id.short(),
                    pinned.version
                )));
            }
        }
        Ok(())
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), LockError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        std::io::Write::write_all(&mut tmp, content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| LockError::Io(e.error))?;
        if let Ok(f) = fs::File::open(dir) {
            let _ = f.sync_all();
        }
        Ok(())
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}
