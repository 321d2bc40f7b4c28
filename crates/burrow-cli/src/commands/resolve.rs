use super::{colorize_role, json_pretty, lock_path_for, report, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use burrow_core::Engine;
use burrow_schema::LockFile;
use std::path::Path;

pub fn run(engine: &Engine, manifest: &Path, locked: bool, json: bool) -> Result<u8, String> {
    let mut session = engine.load(manifest).map_err(|e| e.to_string())?;
    let lock_path = lock_path_for(manifest);

    let pinned = if locked {
        let lock = LockFile::read_from_file(&lock_path)
            .map_err(|e| format!("lock error: {}: {e}", lock_path.display()))?;
        Some(lock)
    } else {
        None
    };

    let pb = (!json).then(|| {
        spinner(&format!(
            "resolving {} inputs via {}...",
            session.manifest().inputs().count(),
            engine.provider_name()
        ))
    });
    let result = match &pinned {
        Some(lock) => session.resolve_locked(lock).map(|_| ()),
        None => session.resolve().map(|_| ()),
    };
    if let Err(e) = result {
        if let Some(pb) = &pb {
            spin_fail(pb, "resolution failed");
        }
        return report(e, json);
    }

    let lock = session
        .lock_file()
        .ok_or_else(|| "resolution produced no lock".to_owned())?;
    if pinned.is_none() {
        lock.write_to_file(&lock_path)
            .map_err(|e| format!("lock error: {e}"))?;
    }
    if let Some(pb) = &pb {
        spin_ok(pb, &format!("resolved {}", lock.short_id));
    }

    if json {
        let payload = serde_json::json!({
            "status": "resolved",
            "env_id": lock.env_id,
            "short_id": lock.short_id,
            "lock_file": lock_path,
            "locked": locked,
            "inputs": lock.inputs,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for input in &lock.inputs {
            println!(
                "  {:<5} {:<20} {:<14} {}",
                colorize_role(input.role),
                input.name,
                input.version,
                input.content_id.short()
            );
        }
        if locked {
            println!("matches {}", lock_path.display());
        } else {
            println!("wrote {}", lock_path.display());
        }
        println!("env_id: {}", lock.env_id);
    }
    Ok(EXIT_SUCCESS)
}
