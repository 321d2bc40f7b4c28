use crate::cache::ArtifactCache;
use crate::layout::StoreLayout;
use crate::StoreError;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

#[derive(Debug, Default, Serialize)]
pub struct IntegrityReport {
    pub artifacts_checked: usize,
    pub artifacts_passed: usize,
    pub index_checked: usize,
    pub index_passed: usize,
    pub failed: Vec<IntegrityFailure>,
}

#[derive(Debug, Serialize)]
pub struct IntegrityFailure {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct PruneReport {
    pub removed_artifacts: Vec<String>,
    pub removed_index_entries: Vec<String>,
}

/// Re-verify every cached artifact and check that index entries point at
/// artifacts that exist and verify.
pub fn verify_cache(layout: &StoreLayout) -> Result<IntegrityReport, StoreError> {
    let cache = ArtifactCache::new(layout.clone());
    let artifacts = cache.list()?;
    let index = cache.index_entries()?;

    let mut report = IntegrityReport {
        artifacts_checked: artifacts.len(),
        index_checked: index.len(),
        ..Default::default()
    };

    let mut passed = BTreeSet::new();
    for id in &artifacts {
        match cache.get(id) {
            Ok(_) => {
                report.artifacts_passed += 1;
                passed.insert(id.as_str());
            }
            Err(StoreError::IntegrityFailure { actual, .. }) => {
                report.failed.push(IntegrityFailure {
                    key: id.clone(),
                    reason: format!("artifact hash mismatch: got {actual}"),
                });
            }
            Err(e) => {
                report.failed.push(IntegrityFailure {
                    key: id.clone(),
                    reason: format!("artifact read error: {e}"),
                });
            }
        }
    }

    for (key, entry) in &index {
        if passed.contains(entry.content_id.as_str()) {
            report.index_passed += 1;
            continue;
        }
        let problem = if cache.contains(&entry.content_id) {
            "corrupt"
        } else {
            "missing"
        };
        report.failed.push(IntegrityFailure {
            key: key.clone(),
            reason: format!(
                "index entry for '{}' points at {problem} artifact {}",
                entry.input,
                entry.content_id.short()
            ),
        });
    }

    Ok(report)
}

/// Remove artifacts that fail verification and index entries left dangling.
pub fn prune_cache(layout: &StoreLayout) -> Result<PruneReport, StoreError> {
    let cache = ArtifactCache::new(layout.clone());
    let mut report = PruneReport::default();

    for id in cache.list()? {
        if let Err(e) = cache.get(&id) {
            warn!("pruning unreadable artifact {id}: {e}");
            cache.remove(&id)?;
            report.removed_artifacts.push(id);
        }
    }

    for (key, entry) in cache.index_entries()? {
        if !cache.contains(&entry.content_id) {
            cache.remove_index(&key)?;
            report.removed_index_entries.push(entry.input);
        }
    }

    info!(
        "pruned {} artifacts and {} index entries",
        report.removed_artifacts.len(),
        report.removed_index_entries.len()
    );
    Ok(report)
}
