use burrow_schema::{InputRef, InputRole, LockedInput, ResolvedArtifact};
use std::collections::HashSet;
use std::sync::Arc;

/// A declared input paired with the artifact it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInput {
    pub role: InputRole,
    pub input: InputRef,
    pub artifact: Arc<ResolvedArtifact>,
}

/// The resolver's result: build entries then link entries, each list in
/// declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    entries: Vec<ResolvedInput>,
}

impl Resolution {
    pub fn new(entries: Vec<ResolvedInput>) -> Self {
        let mut entries = entries;
        // Stable: declaration order within each role survives.
        entries.sort_by_key(|e| e.role == InputRole::Link);
        Self { entries }
    }

    pub fn entries(&self) -> &[ResolvedInput] {
        &self.entries
    }

    pub fn build(&self) -> impl Iterator<Item = &ResolvedInput> {
        self.entries.iter().filter(|e| e.role == InputRole::Build)
    }

    pub fn link(&self) -> impl Iterator<Item = &ResolvedInput> {
        self.entries.iter().filter(|e| e.role == InputRole::Link)
    }

    /// First entry declared under `name`, build role first.
    pub fn get(&self, name: &str) -> Option<&ResolvedInput> {
        self.entries.iter().find(|e| e.input.name() == name)
    }

    /// Distinct artifacts in declaration order.
    pub fn artifacts(&self) -> Vec<Arc<ResolvedArtifact>> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|e| seen.insert(e.artifact.content_id.clone()))
            .map(|e| Arc::clone(&e.artifact))
            .collect()
    }

    pub fn locked_inputs(&self) -> Vec<LockedInput> {
        self.entries
            .iter()
            .map(|e| LockedInput {
                name: e.input.name().to_owned(),
                constraint: e.input.version().map(str::to_owned),
                role: e.role,
                version: e.artifact.version.clone(),
                content_id: e.artifact.content_id.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
