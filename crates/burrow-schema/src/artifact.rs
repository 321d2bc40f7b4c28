use crate::types::ContentId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("artifact '{name}' content id mismatch: claimed {claimed}, computed {computed}")]
    ContentMismatch {
        name: String,
        claimed: String,
        computed: String,
    },
}

/// A value exported by an artifact into the environment.
///
/// In TOML and JSON an array is a search path, a string is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    /// Ordered search-path fragments, e.g. entries for `PATH`.
    Paths(Vec<String>),
    /// Scalar value that replaces lower-precedence sources.
    Literal(String),
}

impl EnvValue {
    pub fn paths<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EnvValue::Paths(fragments.into_iter().map(Into::into).collect())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        EnvValue::Literal(value.into())
    }
}

/// A concrete, content-addressed resolution of an input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedArtifact {
    pub name: String,
    pub version: String,
    pub content_id: ContentId,
    pub install_path: PathBuf,
    #[serde(default)]
    pub exported_env: BTreeMap<String, EnvValue>,
}

impl ResolvedArtifact {
    /// Build an artifact and stamp it with its computed content id.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        install_path: impl Into<PathBuf>,
        exported_env: BTreeMap<String, EnvValue>,
    ) -> Self {
        let mut artifact = Self {
            name: name.into(),
            version: version.into(),
            content_id: ContentId::new(String::new()),
            install_path: install_path.into(),
            exported_env,
        };
        artifact.content_id = artifact.compute_content_id();
        artifact
    }

    /// Digest of the canonical description: name, version, install path and
    /// exports in key order. The stored `content_id` is not an input.
    pub fn compute_content_id(&self) -> ContentId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(format!("name:{}\n", self.name).as_bytes());
        hasher.update(format!("version:{}\n", self.version).as_bytes());
        hasher.update(format!("path:{}\n", self.install_path.to_string_lossy()).as_bytes());
        for (key, value) in &self.exported_env {
            match value {
                EnvValue::Paths(fragments) => {
                    hasher.update(format!("paths:{key}\n").as_bytes());
                    for fragment in fragments {
                        hasher.update(format!("  {fragment}\n").as_bytes());
                    }
                }
                EnvValue::Literal(v) => {
                    hasher.update(format!("literal:{key}={v}\n").as_bytes());
                }
            }
        }
        ContentId::from(hasher.finalize())
    }

    pub fn verify(&self) -> Result<(), ArtifactError> {
        let computed = self.compute_content_id();
        if computed == self.content_id {
            Ok(())
        } else {
            Err(ArtifactError::ContentMismatch {
                name: self.name.clone(),
                claimed: self.content_id.to_string(),
                computed: computed.into_inner(),
            })
        }
    }
}
