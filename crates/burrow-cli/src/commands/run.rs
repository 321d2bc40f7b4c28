use super::{exit_code, prepare};
use burrow_core::Engine;
use burrow_runtime::{ActivationMode, Activator};
use std::path::Path;

/// Run `command` inside the composed environment and pass its exit code on.
pub fn run(engine: &Engine, manifest: &Path, command: &[String], json: bool) -> Result<u8, String> {
    let Some((program, args)) = command.split_first() else {
        return Err("activation error: no command given".to_owned());
    };

    let mut session = match prepare(engine, manifest, json) {
        Ok(s) => s,
        Err(outcome) => return outcome,
    };

    let activator = Activator::new(ActivationMode::Spawn {
        program: program.clone(),
        args: args.to_vec(),
        cwd: None,
    });
    let mut handle = session.activate(&activator).map_err(|e| e.to_string())?;
    let status = handle
        .wait()
        .map_err(|e| format!("activation error: {e}"))?;
    session.deactivate(handle).map_err(|e| e.to_string())?;
    Ok(exit_code(status))
}

/// Interactive `$SHELL` inside the composed environment.
pub fn shell(engine: &Engine, manifest: &Path, json: bool) -> Result<u8, String> {
    let shell = std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_owned());
    run(engine, manifest, &[shell], json)
}
