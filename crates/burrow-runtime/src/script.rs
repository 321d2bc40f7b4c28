use crate::compose::ComposedEnvironment;
use crate::ActivationError;
use std::fmt;
use std::fmt::Write as _;
use std::str::FromStr;

/// Shell dialect of an emitted activation script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptFormat {
    #[default]
    Posix,
    Fish,
}

impl FromStr for ScriptFormat {
    type Err = ActivationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posix" | "sh" | "bash" | "zsh" => Ok(ScriptFormat::Posix),
            "fish" => Ok(ScriptFormat::Fish),
            other => Err(ActivationError::UnknownFormat(other.to_owned())),
        }
    }
}

impl fmt::Display for ScriptFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptFormat::Posix => f.write_str("posix"),
            ScriptFormat::Fish => f.write_str("fish"),
        }
    }
}

impl ScriptFormat {
    /// File extension conventionally used for this dialect.
    pub fn extension(self) -> &'static str {
        match self {
            ScriptFormat::Posix => "sh",
            ScriptFormat::Fish => "fish",
        }
    }

    fn quote(self, value: &str) -> String {
        match self {
            ScriptFormat::Posix => format!("'{}'", value.replace('\'', "'\\''")),
            ScriptFormat::Fish => {
                format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
            }
        }
    }

    fn set_line(self, key: &str, value: &str) -> String {
        match self {
            ScriptFormat::Posix => format!("export {key}={}", self.quote(value)),
            ScriptFormat::Fish => format!("set -gx {key} {}", self.quote(value)),
        }
    }

    fn unset_line(self, key: &str) -> String {
        match self {
            ScriptFormat::Posix => format!("unset {key}"),
            ScriptFormat::Fish => format!("set -e {key}"),
        }
    }

    /// Assignments for every composed variable, in merge order.
    pub fn render_activate(self, env: &ComposedEnvironment) -> Result<String, ActivationError> {
        let mut out = String::from("# burrow activation\n");
        for (key, value) in env.variables() {
            validate_identifier(key)?;
            let _ = writeln!(out, "{}", self.set_line(key, value));
        }
        Ok(out)
    }

    /// Restore every composed variable to its pre-activation value, or unset
    /// it when the base environment did not have it.
    pub fn render_deactivate(self, env: &ComposedEnvironment) -> Result<String, ActivationError> {
        let mut out = String::from("# burrow deactivation\n");
        for (key, _) in env.variables().iter().rev() {
            validate_identifier(key)?;
            let line = match env.base().get(key) {
                Some(original) => self.set_line(key, original),
                None => self.unset_line(key),
            };
            let _ = writeln!(out, "{line}");
        }
        Ok(out)
    }
}

fn validate_identifier(key: &str) -> Result<(), ActivationError> {
    let mut chars = key.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ActivationError::InvalidVariable(key.to_owned()))
    }
}
