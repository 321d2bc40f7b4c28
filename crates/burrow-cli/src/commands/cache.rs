use super::{json_pretty, EXIT_STORE_ERROR, EXIT_SUCCESS};
use burrow_core::Engine;

pub fn list(engine: &Engine, json: bool) -> Result<u8, String> {
    let artifacts = engine.cached_artifacts().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&artifacts)?);
    } else if artifacts.is_empty() {
        println!("artifact cache is empty");
    } else {
        for a in &artifacts {
            println!(
                "{:<20} {:<14} {}  {}",
                a.name,
                a.version,
                a.content_id.short(),
                a.install_path.display()
            );
        }
    }
    Ok(EXIT_SUCCESS)
}

pub fn verify(engine: &Engine, json: bool) -> Result<u8, String> {
    let report = engine.verify_cache().map_err(|e| e.to_string())?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!(
            "cache integrity: {}/{} artifacts, {}/{} index entries passed",
            report.artifacts_passed,
            report.artifacts_checked,
            report.index_passed,
            report.index_checked
        );
        for f in &report.failed {
            println!("  FAIL {}: {}", f.key, f.reason);
        }
    }

    if report.failed.is_empty() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_STORE_ERROR)
    }
}

pub fn prune(engine: &Engine, json: bool) -> Result<u8, String> {
    let report = engine.prune_cache().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!(
            "pruned {} artifacts and {} index entries",
            report.removed_artifacts.len(),
            report.removed_index_entries.len()
        );
    }
    Ok(EXIT_SUCCESS)
}
