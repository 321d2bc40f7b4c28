use crate::layout::StoreLayout;
use crate::{fsync_dir, StoreError};
use burrow_schema::{ContentId, InputRef, ResolvedArtifact};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Records which artifact an input last resolved to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexEntry {
    pub input: String,
    pub content_id: ContentId,
    pub cached_at: String,
}

/// Content-addressed cache of resolved artifacts.
///
/// Artifacts are keyed by their content id and verified on every write and
/// read. Two writers racing on the same artifact write identical bytes, so the
/// atomic rename makes last-writer-wins safe without locking.
#[derive(Debug, Clone)]
pub struct ArtifactCache {
    layout: StoreLayout,
}

impl ArtifactCache {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Commit a verified artifact. Idempotent: an existing entry is kept when
    /// it still verifies and rewritten otherwise.
    pub fn put(&self, artifact: &ResolvedArtifact) -> Result<ContentId, StoreError> {
        let computed = artifact.compute_content_id();
        if computed != artifact.content_id {
            return Err(StoreError::IntegrityFailure {
                id: artifact.content_id.to_string(),
                expected: artifact.content_id.to_string(),
                actual: computed.into_inner(),
            });
        }

        let dest = self.layout.artifact_path(&artifact.content_id);
        if dest.exists() {
            match self.get(&artifact.content_id) {
                Ok(_) => return Ok(computed),
                Err(e) => warn!(
                    "replacing unreadable cached artifact {}: {e}",
                    artifact.content_id.short()
                ),
            }
        }

        let content = serde_json::to_string_pretty(artifact)?;
        write_atomic(&self.layout.artifacts_dir(), &dest, content.as_bytes())?;
        debug!(
            "cached artifact {} ({})",
            artifact.name,
            artifact.content_id.short()
        );
        Ok(computed)
    }

    /// Load an artifact by content id, verifying it on read.
    pub fn get(&self, content_id: &str) -> Result<ResolvedArtifact, StoreError> {
        let path = self.layout.artifact_path(content_id);
        if !path.exists() {
            return Err(StoreError::ArtifactNotFound(content_id.to_owned()));
        }
        let data = fs::read(&path)?;
        let artifact: ResolvedArtifact = serde_json::from_slice(&data)?;

        let computed = artifact.compute_content_id();
        if computed != *content_id || artifact.content_id != *content_id {
            return Err(StoreError::IntegrityFailure {
                id: content_id.to_owned(),
                expected: content_id.to_owned(),
                actual: computed.into_inner(),
            });
        }

        Ok(artifact)
    }

    pub fn contains(&self, content_id: &str) -> bool {
        self.layout.artifact_path(content_id).exists()
    }

    pub fn remove(&self, content_id: &str) -> Result<(), StoreError> {
        let path = self.layout.artifact_path(content_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Content ids of all cached artifacts, sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        list_json_stems(&self.layout.artifacts_dir())
    }

    /// Point the index entry for `input` at `content_id`.
    pub fn record(&self, input: &InputRef, content_id: &ContentId) -> Result<(), StoreError> {
        let entry = IndexEntry {
            input: input.to_string(),
            content_id: content_id.clone(),
            cached_at: chrono::Utc::now().to_rfc3339(),
        };
        let content = serde_json::to_string_pretty(&entry)?;
        let dir = self.layout.index_dir();
        write_atomic(&dir, &dir.join(index_file(input)), content.as_bytes())
    }

    /// Warm lookup: the artifact an input last resolved to, if still cached.
    ///
    /// A dangling index entry yields `Ok(None)`; a corrupt artifact is an error.
    pub fn lookup(&self, input: &InputRef) -> Result<Option<ResolvedArtifact>, StoreError> {
        let path = self.layout.index_dir().join(index_file(input));
        if !path.exists() {
            return Ok(None);
        }
        let entry: IndexEntry = serde_json::from_slice(&fs::read(&path)?)?;
        match self.get(&entry.content_id) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(StoreError::ArtifactNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// All index entries with their file keys, sorted by key.
    pub fn index_entries(&self) -> Result<Vec<(String, IndexEntry)>, StoreError> {
        let dir = self.layout.index_dir();
        let mut entries = Vec::new();
        for key in list_json_stems(&dir)? {
            let data = fs::read(dir.join(format!("{key}.json")))?;
            entries.push((key, serde_json::from_slice(&data)?));
        }
        Ok(entries)
    }

    pub(crate) fn remove_index(&self, key: &str) -> Result<(), StoreError> {
        let path = self.layout.index_dir().join(format!("{key}.json"));
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}

fn index_file(input: &InputRef) -> String {
    let key = format!(
        "input:{}\0{}",
        input.name(),
        input.version().unwrap_or("*")
    );
    format!("{}.json", blake3::hash(key.as_bytes()).to_hex())
}

fn write_atomic(dir: &Path, dest: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

fn list_json_stems(dir: &Path) -> Result<Vec<String>, StoreError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with('.') {
                continue;
            }
            if let Some(stem) = name.strip_suffix(".json") {
                out.push(stem.to_owned());
            }
        }
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_schema::EnvValue;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn test_cache() -> (tempfile::TempDir, ArtifactCache) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        (dir, ArtifactCache::new(layout))
    }

    fn artifact(name: &str, version: &str) -> ResolvedArtifact {
        let mut env = BTreeMap::new();
        env.insert(
            "PATH".to_owned(),
            EnvValue::paths([format!("/store/{name}-{version}/bin")]),
        );
        ResolvedArtifact::new(name, version, format!("/store/{name}-{version}"), env)
    }

    #[test]
    fn put_and_get_roundtrip() {
        let (_dir, cache) = test_cache();
        let a = artifact("rustc", "1.75.0");
        let id = cache.put(&a).unwrap();
        assert_eq!(id, a.content_id);
        assert_eq!(cache.get(&id).unwrap(), a);
        assert!(cache.contains(&id));
    }

    #[test]
    fn put_is_idempotent() {
        let (_dir, cache) = test_cache();
        let a = artifact("cargo", "1.75.0");
        let h1 = cache.put(&a).unwrap();
        let h2 = cache.put(&a).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(cache.list().unwrap().len(), 1);
    }

    #[test]
    fn put_rejects_unverified_artifact() {
        let (_dir, cache) = test_cache();
        let mut a = artifact("openssl", "3.0.13");
        a.version = "3.0.14".to_owned();
        assert!(matches!(
            cache.put(&a),
            Err(StoreError::IntegrityFailure { .. })
        ));
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn get_nonexistent_fails() {
        let (_dir, cache) = test_cache();
        assert!(matches!(
            cache.get("nope"),
            Err(StoreError::ArtifactNotFound(_))
        ));
    }

    #[test]
    fn integrity_check_on_read() {
        let (_dir, cache) = test_cache();
        let a = artifact("zlib", "1.3");
        let id = cache.put(&a).unwrap();

        let mut tampered = a.clone();
        tampered.install_path = "/tmp/evil".into();
        let path = cache.layout().artifact_path(&id);
        fs::write(&path, serde_json::to_string(&tampered).unwrap()).unwrap();

        assert!(matches!(
            cache.get(&id),
            Err(StoreError::IntegrityFailure { .. })
        ));
    }

    #[test]
    fn put_repairs_corrupt_blob() {
        let (_dir, cache) = test_cache();
        let a = artifact("libffi", "3.4");
        let id = cache.put(&a).unwrap();

        let path = cache.layout().artifact_path(&id);
        fs::write(&path, b"{ not json").unwrap();
        assert!(cache.get(&id).is_err());

        assert_eq!(cache.put(&a).unwrap(), id);
        assert_eq!(cache.get(&id).unwrap(), a);
    }

    #[test]
    fn index_record_and_lookup() {
        let (_dir, cache) = test_cache();
        let input = InputRef::parse("openssl@3.0");
        assert!(cache.lookup(&input).unwrap().is_none());

        let a = artifact("openssl", "3.0.13");
        cache.put(&a).unwrap();
        cache.record(&input, &a.content_id).unwrap();

        let found = cache.lookup(&input).unwrap().unwrap();
        assert_eq!(found.content_id, a.content_id);

        // A different constraint is a different key.
        assert!(cache
            .lookup(&InputRef::parse("openssl@1.1"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn dangling_index_entry_is_a_miss() {
        let (_dir, cache) = test_cache();
        let input = InputRef::parse("cmake");
        let a = artifact("cmake", "3.28");
        cache.put(&a).unwrap();
        cache.record(&input, &a.content_id).unwrap();
        cache.remove(&a.content_id).unwrap();
        assert!(cache.lookup(&input).unwrap().is_none());
        assert_eq!(cache.index_entries().unwrap().len(), 1);
    }

    #[test]
    fn concurrent_puts_of_same_artifact_are_safe() {
        let (_dir, cache) = test_cache();
        let cache = Arc::new(cache);
        let a = Arc::new(artifact("llvm", "17.0.6"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let a = Arc::clone(&a);
                std::thread::spawn(move || cache.put(&a).unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), a.content_id);
        }

        assert_eq!(cache.list().unwrap(), vec![a.content_id.to_string()]);
        assert_eq!(cache.get(&a.content_id).unwrap(), *a);
    }
}
