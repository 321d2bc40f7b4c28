pub mod cache;
pub mod check;
pub mod completions;
pub mod env;
pub mod resolve;
pub mod run;

use burrow_core::{CoreError, Engine, Session};
use burrow_runtime::inherited_environment;
use burrow_schema::InputRole;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_MANIFEST_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_RESOLUTION_ERROR: u8 = 4;
pub const EXIT_ACTIVATION_ERROR: u8 = 5;

pub const LOCK_FILE: &str = "burrow.lock";

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

fn plain_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg}").unwrap_or_else(|_| ProgressStyle::default_spinner())
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
        .map(|s| s.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]))
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(plain_style());
    pb.finish_with_message(format!("✗ {msg}"));
}

pub fn colorize_role(role: InputRole) -> String {
    use console::Style;
    match role {
        InputRole::Build => Style::new().cyan().apply_to("build").to_string(),
        InputRole::Link => Style::new().magenta().apply_to("link").to_string(),
    }
}

/// `burrow.lock` next to the manifest.
pub fn lock_path_for(manifest: &Path) -> PathBuf {
    manifest.with_file_name(LOCK_FILE)
}

/// Resolution failures are printed as structured output under `--json`;
/// everything else becomes an error message for `main`.
pub fn report(err: CoreError, json: bool) -> Result<u8, String> {
    match err {
        CoreError::Resolution(e) if json => {
            let payload = serde_json::json!({
                "status": "failed",
                "missing": e.missing,
                "conflicting": e.conflicting,
            });
            println!("{}", json_pretty(&payload)?);
            Ok(EXIT_RESOLUTION_ERROR)
        }
        other => Err(other.to_string()),
    }
}

/// Load, resolve and compose a manifest over the current environment.
pub fn prepare<'e>(
    engine: &'e Engine,
    manifest: &Path,
    json: bool,
) -> Result<Session<'e>, Result<u8, String>> {
    let mut session = engine.load(manifest).map_err(|e| Err(e.to_string()))?;
    let pb = (!json).then(|| spinner(&format!("resolving '{}'...", session.manifest().name())));
    let prepared = session
        .prepare(inherited_environment())
        .map(|composed| composed.variables().len());
    match prepared {
        Ok(count) => {
            if let Some(pb) = &pb {
                spin_ok(pb, &format!("{count} variables composed"));
            }
            Ok(session)
        }
        Err(e) => {
            if let Some(pb) = &pb {
                spin_fail(pb, "resolution failed");
            }
            Err(report(e, json))
        }
    }
}

pub fn exit_code(status: ExitStatus) -> u8 {
    status
        .code()
        .and_then(|c| u8::try_from(c).ok())
        .unwrap_or(EXIT_FAILURE)
}

/// Exit code for an error message produced by a command.
pub fn classify(msg: &str) -> u8 {
    if msg.starts_with("manifest error:") {
        EXIT_MANIFEST_ERROR
    } else if msg.starts_with("store error:") {
        EXIT_STORE_ERROR
    } else if msg.starts_with("resolution failed:") || msg.starts_with("lock error:") {
        EXIT_RESOLUTION_ERROR
    } else if msg.starts_with("activation error:") {
        EXIT_ACTIVATION_ERROR
    } else {
        EXIT_FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_FAILURE,
            EXIT_MANIFEST_ERROR,
            EXIT_STORE_ERROR,
            EXIT_RESOLUTION_ERROR,
            EXIT_ACTIVATION_ERROR,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn classify_by_error_family() {
        assert_eq!(classify("manifest error: name must not be empty"), EXIT_MANIFEST_ERROR);
        assert_eq!(classify("store error: I/O"), EXIT_STORE_ERROR);
        assert_eq!(classify("resolution failed: 1 missing, 0 conflicting"), EXIT_RESOLUTION_ERROR);
        assert_eq!(classify("lock error: lock file drift: x"), EXIT_RESOLUTION_ERROR);
        assert_eq!(classify("activation error: failed to spawn 'x'"), EXIT_ACTIVATION_ERROR);
        assert_eq!(classify("something else"), EXIT_FAILURE);
    }

    #[test]
    fn lock_sits_next_to_manifest() {
        assert_eq!(lock_path_for(Path::new("burrow.toml")), PathBuf::from("burrow.lock"));
        assert_eq!(
            lock_path_for(Path::new("/work/proj/env.toml")),
            PathBuf::from("/work/proj/burrow.lock")
        );
    }

    #[test]
    fn json_pretty_serializes_object() {
        let val = serde_json::json!({"key": "value"});
        let result = json_pretty(&val).unwrap();
        assert!(result.contains("\"key\""));
    }

    #[test]
    fn colorize_role_keeps_label() {
        assert!(colorize_role(InputRole::Build).contains("build"));
        assert!(colorize_role(InputRole::Link).contains("link"));
    }

    #[test]
    fn spinner_finishes() {
        let pb = spinner("testing...");
        spin_ok(&pb, "done");
        let pb = spinner("testing...");
        spin_fail(&pb, "failed");
    }
}
