use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("manifest name must not be empty")]
    EmptyName,
    #[error("invalid input name in {role}: '{name}' ({reason})")]
    InvalidInputName {
        role: InputRole,
        name: String,
        reason: &'static str,
    },
    #[error("duplicate input '{name}' in {role}")]
    DuplicateInput { role: InputRole, name: String },
    #[error("invalid environment override '{key}': {reason}")]
    InvalidOverride { key: String, reason: &'static str },
    #[error(transparent)]
    Conflict(#[from] ConflictError),
}

/// The same input declared in both lists with different version constraints.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("conflicting declarations of '{name}': build_inputs declares '{build}', link_inputs declares '{link}'")]
pub struct ConflictError {
    pub name: String,
    pub build: InputRef,
    pub link: InputRef,
}

/// Which list of the manifest an input was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputRole {
    Build,
    Link,
}

impl fmt::Display for InputRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputRole::Build => f.write_str("build_inputs"),
            InputRole::Link => f.write_str("link_inputs"),
        }
    }
}

/// A named, optionally version-constrained reference to a dependency.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InputRef {
    name: String,
    version: Option<String>,
}

impl InputRef {
    pub fn new(name: &str, version: Option<&str>) -> Self {
        Self {
            name: name.trim().to_owned(),
            version: version
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned),
        }
    }

    /// Parse the short form `name` or `name@constraint`.
    pub fn parse(spec: &str) -> Self {
        match spec.split_once('@') {
            Some((name, version)) => Self::new(name, Some(version)),
            None => Self::new(spec, None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    fn check_name(&self, role: InputRole) -> Result<(), ManifestError> {
        let reason = if self.name.is_empty() {
            "must not be empty"
        } else if self.name.contains('@') {
            "must not contain '@'"
        } else if self.name.chars().any(char::is_whitespace) {
            "must not contain whitespace"
        } else {
            return Ok(());
        };
        Err(ManifestError::InvalidInputName {
            role,
            name: self.name.clone(),
            reason,
        })
    }
}

impl fmt::Display for InputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}@{v}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&str> for InputRef {
    fn from(spec: &str) -> Self {
        Self::parse(spec)
    }
}

impl Serialize for InputRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for InputRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(RawInput::deserialize(deserializer)?.into())
    }
}

/// Environment overrides in declaration order. Lookups ignore order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides(Vec<(String, String)>);

impl EnvOverrides {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Result<Self, ManifestError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for (key, value) in pairs {
            let key: String = key.into();
            let reason = if key.is_empty() {
                Some("name must not be empty")
            } else if key.contains('=') || key.contains('\0') {
                Some("name must not contain '=' or NUL")
            } else if !seen.insert(key.clone()) {
                Some("declared more than once")
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(ManifestError::InvalidOverride { key, reason });
            }
            out.push((key, value.into()));
        }
        Ok(Self(out))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for EnvOverrides {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

/// A parsed, validated environment descriptor. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    name: String,
    build_inputs: Vec<InputRef>,
    link_inputs: Vec<InputRef>,
    env_overrides: EnvOverrides,
}

impl Manifest {
    /// Validate and assemble a manifest.
    ///
    /// Input names must be non-empty and unique within their list. A name in
    /// both lists is accepted only when both declarations carry the same
    /// version constraint.
    pub fn new(
        name: &str,
        build_inputs: Vec<InputRef>,
        link_inputs: Vec<InputRef>,
        env_overrides: EnvOverrides,
    ) -> Result<Self, ManifestError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ManifestError::EmptyName);
        }

        check_list(InputRole::Build, &build_inputs)?;
        check_list(InputRole::Link, &link_inputs)?;

        for build in &build_inputs {
            if let Some(link) = link_inputs.iter().find(|l| l.name == build.name) {
                if link.version != build.version {
                    return Err(ConflictError {
                        name: build.name.clone(),
                        build: build.clone(),
                        link: link.clone(),
                    }
                    .into());
                }
            }
        }

        Ok(Self {
            name: name.to_owned(),
            build_inputs,
            link_inputs,
            env_overrides,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn build_inputs(&self) -> &[InputRef] {
        &self.build_inputs
    }

    pub fn link_inputs(&self) -> &[InputRef] {
        &self.link_inputs
    }

    pub fn env_overrides(&self) -> &EnvOverrides {
        &self.env_overrides
    }

    /// All declarations, build inputs first, each in declaration order.
    pub fn inputs(&self) -> impl Iterator<Item = (InputRole, &InputRef)> {
        self.build_inputs
            .iter()
            .map(|i| (InputRole::Build, i))
            .chain(self.link_inputs.iter().map(|i| (InputRole::Link, i)))
    }

    /// Serialize back into the descriptor format accepted by [`parse_manifest_str`].
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        use toml::Value;

        let list = |inputs: &[InputRef]| {
            Value::Array(inputs.iter().map(|i| Value::String(i.to_string())).collect())
        };

        let mut env = toml::Table::new();
        for (k, v) in self.env_overrides.iter() {
            env.insert(k.to_owned(), Value::String(v.to_owned()));
        }

        let mut doc = toml::Table::new();
        doc.insert("name".to_owned(), Value::String(self.name.clone()));
        doc.insert("build_inputs".to_owned(), list(&self.build_inputs));
        doc.insert("link_inputs".to_owned(), list(&self.link_inputs));
        doc.insert("env".to_owned(), Value::Table(env));
        toml::to_string(&doc)
    }
}

fn check_list(role: InputRole, inputs: &[InputRef]) -> Result<(), ManifestError> {
    let mut seen = HashSet::with_capacity(inputs.len());
    for input in inputs {
        input.check_name(role)?;
        if !seen.insert(input.name.as_str()) {
            return Err(ManifestError::DuplicateInput {
                role,
                name: input.name.clone(),
            });
        }
    }
    Ok(())
}

// Unknown top-level fields are ignored for forward compatibility.
#[derive(Debug, Deserialize)]
struct RawManifest {
    name: String,
    #[serde(default)]
    build_inputs: Vec<RawInput>,
    #[serde(default)]
    link_inputs: Vec<RawInput>,
    #[serde(default, alias = "env_overrides")]
    env: toml::Table,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawInput {
    Short(String),
    Full {
        name: String,
        #[serde(default)]
        version: Option<String>,
    },
}

impl From<RawInput> for InputRef {
    fn from(raw: RawInput) -> Self {
        match raw {
            RawInput::Short(spec) => InputRef::parse(&spec),
            RawInput::Full { name, version } => InputRef::new(&name, version.as_deref()),
        }
    }
}

pub fn parse_manifest_str(input: &str) -> Result<Manifest, ManifestError> {
    let raw: RawManifest = toml::from_str(input)?;

    let mut overrides = Vec::with_capacity(raw.env.len());
    for (key, value) in raw.env {
        match value {
            toml::Value::String(s) => overrides.push((key, s)),
            _ => {
                return Err(ManifestError::InvalidOverride {
                    key,
                    reason: "value must be a string",
                })
            }
        }
    }

    Manifest::new(
        &raw.name,
        raw.build_inputs.into_iter().map(InputRef::from).collect(),
        raw.link_inputs.into_iter().map(InputRef::from).collect(),
        EnvOverrides::from_pairs(overrides)?,
    )
}

pub fn parse_manifest_file(path: impl AsRef<Path>) -> Result<Manifest, ManifestError> {
    let content = fs::read_to_string(path)?;
    parse_manifest_str(&content)
}
