use super::{json_pretty, prepare, EXIT_SUCCESS};
use burrow_core::Engine;
use burrow_runtime::{ActivationMode, Activator, ScriptFormat, ScriptTarget};
use std::path::Path;

pub fn run(
    engine: &Engine,
    manifest: &Path,
    format: &str,
    output: Option<&Path>,
    deactivate: bool,
    json: bool,
) -> Result<u8, String> {
    let format: ScriptFormat = format
        .parse()
        .map_err(|e| format!("activation error: {e}"))?;

    let mut session = match prepare(engine, manifest, json) {
        Ok(s) => s,
        Err(outcome) => return outcome,
    };

    let target = output.map_or(ScriptTarget::Memory, |p| ScriptTarget::File(p.to_path_buf()));
    let activator = Activator::new(ActivationMode::Script {
        format,
        target,
        deactivate,
    });
    let mut handle = session.activate(&activator).map_err(|e| e.to_string())?;

    let written = handle.persist();
    let body = handle
        .script()
        .map(|s| {
            if deactivate {
                s.deactivate.clone()
            } else {
                s.activate.clone()
            }
        })
        .unwrap_or_default();

    if json {
        let variables: Vec<_> = session
            .composed()
            .map(|c| c.variables().to_vec())
            .unwrap_or_default();
        let payload = serde_json::json!({
            "format": format.to_string(),
            "deactivate": deactivate,
            "path": written,
            "variables": variables,
            "script": body,
        });
        println!("{}", json_pretty(&payload)?);
    } else if let Some(path) = &written {
        eprintln!("wrote {format} script to {}", path.display());
    } else {
        print!("{body}");
    }

    session.deactivate(handle).map_err(|e| e.to_string())?;
    Ok(EXIT_SUCCESS)
}
