use crate::provider::PackageProvider;
use crate::RuntimeError;
use burrow_schema::{EnvValue, InputRef, ResolvedArtifact};
use semver::{Version, VersionReq};
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File that marks a directory under the registry root as an installed artifact.
pub const DESCRIPTOR_FILE: &str = "burrow-artifact.toml";

/// Placeholder in literal exports that expands to the install path.
const OUT_PLACEHOLDER: &str = "${out}";

#[derive(Debug, Deserialize)]
struct Descriptor {
    name: String,
    version: String,
    #[serde(default)]
    exports: Option<BTreeMap<String, EnvValue>>,
}

/// Provider backed by a directory of prebuilt artifacts.
///
/// Every immediate subdirectory of the root holding a `burrow-artifact.toml`
/// is a candidate. The highest version satisfying the input's constraint wins.
pub struct RegistryProvider {
    root: PathBuf,
}

impl RegistryProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn candidates(&self, name: &str) -> Result<Vec<(Descriptor, PathBuf)>, RuntimeError> {
        if !self.root.is_dir() {
            debug!("registry {} does not exist", self.root.display());
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let dir = entry?.path();
            let descriptor_path = dir.join(DESCRIPTOR_FILE);
            if !descriptor_path.is_file() {
                continue;
            }
            match read_descriptor(&descriptor_path) {
                Ok(d) if d.name == name => out.push((d, dir)),
                Ok(_) => {}
                Err(e) => warn!("skipping registry entry: {e}"),
            }
        }
        Ok(out)
    }
}

impl PackageProvider for RegistryProvider {
    fn name(&self) -> &'static str {
        "registry"
    }

    fn lookup(&self, input: &InputRef) -> Result<Option<ResolvedArtifact>, RuntimeError> {
        let best = self
            .candidates(input.name())?
            .into_iter()
            .filter(|(d, _)| version_matches(input.version(), &d.version))
            // Equal versions go to the first directory by path.
            .max_by(|(a, da), (b, db)| {
                compare_versions(&a.version, &b.version).then_with(|| db.cmp(da))
            });

        let Some((descriptor, dir)) = best else {
            debug!("no registry artifact satisfies {input}");
            return Ok(None);
        };

        let exported_env = match descriptor.exports {
            Some(exports) => expand_exports(&dir, exports),
            None => default_exports(&dir),
        };
        debug!(
            "registry resolved {input} to {} in {}",
            descriptor.version,
            dir.display()
        );
        Ok(Some(ResolvedArtifact::new(
            descriptor.name,
            descriptor.version,
            dir,
            exported_env,
        )))
    }
}

fn read_descriptor(path: &Path) -> Result<Descriptor, RuntimeError> {
    let content = fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| RuntimeError::InvalidDescriptor {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Relative path fragments are anchored at the install directory; `${out}`
/// in literals expands to it.
fn expand_exports(
    install: &Path,
    exports: BTreeMap<String, EnvValue>,
) -> BTreeMap<String, EnvValue> {
    let out = install.to_string_lossy();
    exports
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                EnvValue::Paths(fragments) => EnvValue::Paths(
                    fragments
                        .into_iter()
                        .map(|f| {
                            if Path::new(&f).is_absolute() {
                                f
                            } else {
                                install.join(f).to_string_lossy().into_owned()
                            }
                        })
                        .collect(),
                ),
                EnvValue::Literal(v) => EnvValue::Literal(v.replace(OUT_PLACEHOLDER, &out)),
            };
            (key, value)
        })
        .collect()
}

fn default_exports(install: &Path) -> BTreeMap<String, EnvValue> {
    const CONVENTIONS: &[(&str, &[&str])] = &[
        ("bin", &["PATH"]),
        ("lib", &["LIBRARY_PATH", "LD_LIBRARY_PATH"]),
        ("lib/pkgconfig", &["PKG_CONFIG_PATH"]),
        ("include", &["CPATH"]),
    ];

    let mut env: BTreeMap<String, EnvValue> = BTreeMap::new();
    for (subdir, vars) in CONVENTIONS {
        let path = install.join(subdir);
        if !path.is_dir() {
            continue;
        }
        let fragment = path.to_string_lossy().into_owned();
        for var in *vars {
            if let Some(EnvValue::Paths(existing)) = env.get_mut(*var) {
                existing.push(fragment.clone());
            } else {
                env.insert((*var).to_owned(), EnvValue::paths([fragment.clone()]));
            }
        }
    }
    env
}

/// Parse versions like `3`, `3.0` or `3.0.13` by padding missing components.
fn lenient_version(raw: &str) -> Option<Version> {
    if let Ok(v) = Version::parse(raw) {
        return Some(v);
    }
    let dots = raw.matches('.').count();
    let padded = match dots {
        0 => format!("{raw}.0.0"),
        1 => format!("{raw}.0"),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

fn version_matches(constraint: Option<&str>, version: &str) -> bool {
    let Some(constraint) = constraint else {
        return true;
    };
    if constraint == version {
        return true;
    }
    match (VersionReq::parse(constraint), lenient_version(version)) {
        (Ok(req), Some(v)) => req.matches(&v),
        _ => false,
    }
}

fn compare_versions(a: &str, b: &str) -> Ordering {
    match (lenient_version(a), lenient_version(b)) {
        (Some(va), Some(vb)) => va.cmp(&vb).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}
