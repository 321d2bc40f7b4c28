use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Current store format version. Incremented on incompatible layout changes.
pub const STORE_FORMAT_VERSION: u32 = 1;
const VERSION_FILE: &str = "version";

/// Directory layout of a burrow store.
///
/// ```text
/// <root>/cache/version
/// <root>/cache/artifacts/<content_id>.json
/// <root>/cache/index/<input key>.json
/// <root>/registry/            default package registry
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreVersion {
    format_version: u32,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    #[inline]
    pub fn artifacts_dir(&self) -> PathBuf {
        self.cache_dir().join("artifacts")
    }

    #[inline]
    pub fn artifact_path(&self, content_id: &str) -> PathBuf {
        self.artifacts_dir().join(format!("{content_id}.json"))
    }

    #[inline]
    pub fn index_dir(&self) -> PathBuf {
        self.cache_dir().join("index")
    }

    #[inline]
    pub fn registry_dir(&self) -> PathBuf {
        self.root.join("registry")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.artifacts_dir())?;
        fs::create_dir_all(self.index_dir())?;

        let cache_dir = self.cache_dir();
        let version_path = cache_dir.join(VERSION_FILE);
        if version_path.exists() {
            self.verify_version()?;
        } else {
            let ver = StoreVersion {
                format_version: STORE_FORMAT_VERSION,
            };
            let content = serde_json::to_string_pretty(&ver)?;
            let mut tmp = NamedTempFile::new_in(&cache_dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&version_path)
                .map_err(|e| StoreError::Io(e.error))?;
            crate::fsync_dir(&cache_dir)?;
        }

        Ok(())
    }

    pub fn verify_version(&self) -> Result<(), StoreError> {
        let content = fs::read_to_string(self.cache_dir().join(VERSION_FILE))?;
        let ver: StoreVersion = serde_json::from_str(&content)?;
        if ver.format_version != STORE_FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: STORE_FORMAT_VERSION,
                found: ver.format_version,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = StoreLayout::new("/tmp/burrow-test");
        assert_eq!(
            layout.artifacts_dir(),
            PathBuf::from("/tmp/burrow-test/cache/artifacts")
        );
        assert_eq!(
            layout.artifact_path("abc"),
            PathBuf::from("/tmp/burrow-test/cache/artifacts/abc.json")
        );
        assert_eq!(
            layout.index_dir(),
            PathBuf::from("/tmp/burrow-test/cache/index")
        );
        assert_eq!(
            layout.registry_dir(),
            PathBuf::from("/tmp/burrow-test/registry")
        );
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        assert!(layout.artifacts_dir().is_dir());
        assert!(layout.index_dir().is_dir());
        layout.verify_version().unwrap();
    }

    #[test]
    fn future_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        fs::write(
            layout.cache_dir().join(VERSION_FILE),
            r#"{"format_version": 99}"#,
        )
        .unwrap();
        assert!(matches!(
            layout.initialize(),
            Err(StoreError::VersionMismatch { found: 99, .. })
        ));
    }
}
