use crate::resolution::Resolution;
use burrow_schema::{ContentId, EnvOverrides, EnvValue};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, trace};

/// Separator for list-valued variables such as `PATH`.
pub const PATH_SEPARATOR: char = ':';

/// A fully merged environment, ready to be activated.
///
/// `variables` holds only what the resolution and overrides wrote, in the
/// order each variable received its final value. Everything else comes from
/// `base` unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComposedEnvironment {
    base: BTreeMap<String, String>,
    variables: Vec<(String, String)>,
}

impl ComposedEnvironment {
    pub fn base(&self) -> &BTreeMap<String, String> {
        &self.base
    }

    pub fn variables(&self) -> &[(String, String)] {
        &self.variables
    }

    /// Effective value of `key` after activation.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .or_else(|| self.base.get(key).map(String::as_str))
    }

    /// The complete environment table a child process sees.
    pub fn full(&self) -> BTreeMap<String, String> {
        let mut table = self.base.clone();
        for (k, v) in &self.variables {
            table.insert(k.clone(), v.clone());
        }
        table
    }
}

/// Snapshot of the current process environment. Entries that are not valid
/// UTF-8 are left out.
pub fn inherited_environment() -> BTreeMap<String, String> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

enum Slot {
    List(Vec<String>),
    Scalar(String),
}

impl Slot {
    fn render(&self) -> String {
        match self {
            Slot::List(parts) => parts.join(&PATH_SEPARATOR.to_string()),
            Slot::Scalar(v) => v.clone(),
        }
    }
}

struct Merger<'a> {
    base: &'a BTreeMap<String, String>,
    slots: HashMap<String, Slot>,
    order: Vec<String>,
}

impl<'a> Merger<'a> {
    fn new(base: &'a BTreeMap<String, String>) -> Self {
        Self {
            base,
            slots: HashMap::new(),
            order: Vec::new(),
        }
    }

    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push(key.to_owned());
    }

    fn current_fragments(&self, key: &str) -> Vec<String> {
        let raw = match self.slots.get(key) {
            Some(Slot::List(parts)) => return parts.clone(),
            Some(Slot::Scalar(v)) => Some(v.as_str()),
            None => self.base.get(key).map(String::as_str),
        };
        raw.map(|v| split_fragments(v).collect())
            .unwrap_or_default()
    }

    fn prepend(&mut self, key: &str, fragments: &[String]) {
        let mut seen = HashSet::new();
        let merged: Vec<String> = fragments
            .iter()
            .cloned()
            .chain(self.current_fragments(key))
            .filter(|f| !f.is_empty() && seen.insert(f.clone()))
            .collect();
        self.slots.insert(key.to_owned(), Slot::List(merged));
        self.touch(key);
    }

    fn replace(&mut self, key: &str, value: &str) {
        self.slots
            .insert(key.to_owned(), Slot::Scalar(value.to_owned()));
        self.touch(key);
    }

    fn apply(&mut self, key: &str, value: &EnvValue) {
        match value {
            EnvValue::Paths(fragments) => self.prepend(key, fragments),
            EnvValue::Literal(v) => self.replace(key, v),
        }
    }

    fn finish(self) -> Vec<(String, String)> {
        self.order
            .into_iter()
            .filter_map(|k| {
                let value = self.slots.get(&k)?.render();
                Some((k, value))
            })
            .collect()
    }
}

fn split_fragments(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(PATH_SEPARATOR)
        .filter(|f| !f.is_empty())
        .map(str::to_owned)
}

/// Merge resolved artifact exports and manifest overrides over `base`.
///
/// Precedence from low to high: `base`, build inputs, link inputs, overrides.
/// Search-path variables accumulate with higher-precedence fragments first;
/// scalar variables and overrides replace. An artifact shared by several
/// entries contributes once, at its last (highest-precedence) position.
pub fn compose(
    resolution: &Resolution,
    overrides: &EnvOverrides,
    base: BTreeMap<String, String>,
) -> ComposedEnvironment {
    let entries = resolution.entries();
    let last_position: HashMap<&ContentId, usize> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (&e.artifact.content_id, i))
        .collect();

    let mut merger = Merger::new(&base);
    for (i, entry) in entries.iter().enumerate() {
        if last_position.get(&entry.artifact.content_id) != Some(&i) {
            trace!(
                "{} shares its artifact with a higher-precedence entry",
                entry.input
            );
            continue;
        }
        debug!(
            "merging exports of {} ({})",
            entry.input,
            entry.artifact.content_id.short()
        );
        for (key, value) in &entry.artifact.exported_env {
            merger.apply(key, value);
        }
    }
    for (key, value) in overrides.iter() {
        merger.replace(key, value);
    }

    let variables = merger.finish();
    debug!("composed {} variables", variables.len());
    ComposedEnvironment { base, variables }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::ResolvedInput;
    use burrow_schema::{InputRef, InputRole, ResolvedArtifact};
    use std::sync::Arc;

    fn artifact(name: &str, env: &[(&str, EnvValue)]) -> Arc<ResolvedArtifact> {
        let exports = env
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect();
        Arc::new(ResolvedArtifact::new(
            name,
            "1.0",
            format!("/store/{name}"),
            exports,
        ))
    }

    fn bin(name: &str) -> Arc<ResolvedArtifact> {
        artifact(name, &[("PATH", EnvValue::paths([format!("/store/{name}/bin")]))])
    }

    fn entry(role: InputRole, artifact: &Arc<ResolvedArtifact>) -> ResolvedInput {
        ResolvedInput {
            role,
            input: InputRef::parse(&artifact.name),
            artifact: Arc::clone(artifact),
        }
    }

    fn base(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn no_overrides() -> EnvOverrides {
        EnvOverrides::default()
    }

    #[test]
    fn paths_prepend_in_precedence_order() {
        let r = Resolution::new(vec![
            entry(InputRole::Build, &bin("rustc")),
            entry(InputRole::Build, &bin("cargo")),
            entry(InputRole::Link, &bin("openssl")),
        ]);
        let env = compose(&r, &no_overrides(), base(&[("PATH", "/usr/bin:/bin")]));
        assert_eq!(
            env.get("PATH"),
            Some("/store/openssl/bin:/store/cargo/bin:/store/rustc/bin:/usr/bin:/bin")
        );
    }

    #[test]
    fn swapping_link_inputs_swaps_path_order() {
        let (a, b) = (bin("zlib"), bin("openssl"));
        let first = compose(
            &Resolution::new(vec![entry(InputRole::Link, &a), entry(InputRole::Link, &b)]),
            &no_overrides(),
            BTreeMap::new(),
        );
        let second = compose(
            &Resolution::new(vec![entry(InputRole::Link, &b), entry(InputRole::Link, &a)]),
            &no_overrides(),
            BTreeMap::new(),
        );
        assert_eq!(first.get("PATH"), Some("/store/openssl/bin:/store/zlib/bin"));
        assert_eq!(second.get("PATH"), Some("/store/zlib/bin:/store/openssl/bin"));
    }

    #[test]
    fn duplicates_keep_highest_precedence_occurrence() {
        let shared = artifact(
            "gcc",
            &[("PATH", EnvValue::paths(["/usr/bin", "/store/gcc/bin", ""]))],
        );
        let r = Resolution::new(vec![entry(InputRole::Link, &shared)]);
        let env = compose(
            &r,
            &no_overrides(),
            base(&[("PATH", "/bin::/usr/bin:/bin")]),
        );
        assert_eq!(env.get("PATH"), Some("/usr/bin:/store/gcc/bin:/bin"));
    }

    #[test]
    fn scalar_from_link_beats_build_regardless_of_build_order() {
        let rustc = artifact("rustc", &[("CC", EnvValue::literal("rustc-cc"))]);
        let cargo = artifact("cargo", &[("CC", EnvValue::literal("cargo-cc"))]);
        let openssl = artifact("openssl", &[("CC", EnvValue::literal("openssl-cc"))]);

        for build in [[&rustc, &cargo], [&cargo, &rustc]] {
            let r = Resolution::new(vec![
                entry(InputRole::Build, build[0]),
                entry(InputRole::Build, build[1]),
                entry(InputRole::Link, &openssl),
            ]);
            let env = compose(&r, &no_overrides(), BTreeMap::new());
            assert_eq!(env.get("CC"), Some("openssl-cc"));
        }
    }

    #[test]
    fn overrides_always_win() {
        let rustc = artifact(
            "rustc",
            &[
                ("RUST_BACKTRACE", EnvValue::literal("0")),
                ("PATH", EnvValue::paths(["/store/rustc/bin"])),
            ],
        );
        let r = Resolution::new(vec![entry(InputRole::Build, &rustc)]);
        let overrides =
            EnvOverrides::from_pairs([("RUST_BACKTRACE", "1"), ("PATH", "/only")]).unwrap();
        let env = compose(&r, &overrides, base(&[("PATH", "/usr/bin")]));
        assert_eq!(env.get("RUST_BACKTRACE"), Some("1"));
        assert_eq!(env.get("PATH"), Some("/only"));
    }

    #[test]
    fn shared_artifact_contributes_once_at_link_position() {
        let openssl = bin("openssl");
        let rustc = bin("rustc");
        let r = Resolution::new(vec![
            entry(InputRole::Build, &openssl),
            entry(InputRole::Build, &rustc),
            entry(InputRole::Link, &openssl),
        ]);
        let env = compose(&r, &no_overrides(), BTreeMap::new());
        assert_eq!(env.get("PATH"), Some("/store/openssl/bin:/store/rustc/bin"));
    }

    #[test]
    fn merge_order_is_order_of_final_writes() {
        let rustc = artifact(
            "rustc",
            &[
                ("A", EnvValue::literal("1")),
                ("B", EnvValue::literal("1")),
            ],
        );
        let openssl = artifact("openssl", &[("A", EnvValue::literal("2"))]);
        let r = Resolution::new(vec![
            entry(InputRole::Build, &rustc),
            entry(InputRole::Link, &openssl),
        ]);
        let overrides = EnvOverrides::from_pairs([("Z", "z")]).unwrap();
        let env = compose(&r, &overrides, BTreeMap::new());
        let keys: Vec<_> = env.variables().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["B", "A", "Z"]);
    }

    #[test]
    fn base_is_untouched_and_full_overlays_it() {
        let r = Resolution::new(vec![entry(InputRole::Build, &bin("rustc"))]);
        let env = compose(
            &r,
            &no_overrides(),
            base(&[("HOME", "/home/dev"), ("PATH", "/usr/bin")]),
        );
        assert_eq!(env.base()["PATH"], "/usr/bin");
        let full = env.full();
        assert_eq!(full["HOME"], "/home/dev");
        assert_eq!(full["PATH"], "/store/rustc/bin:/usr/bin");
        assert_eq!(env.variables().len(), 1);
    }

    #[test]
    fn composition_is_deterministic() {
        let r = Resolution::new(vec![
            entry(InputRole::Build, &bin("rustc")),
            entry(InputRole::Link, &bin("openssl")),
        ]);
        let overrides = EnvOverrides::from_pairs([("RUST_BACKTRACE", "1")]).unwrap();
        let a = compose(&r, &overrides, base(&[("PATH", "/usr/bin")]));
        let b = compose(&r, &overrides, base(&[("PATH", "/usr/bin")]));
        assert_eq!(a, b);
    }
}
