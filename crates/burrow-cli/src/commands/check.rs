use super::{colorize_role, json_pretty, EXIT_SUCCESS};
use burrow_schema::parse_manifest_file;
use std::path::Path;

pub fn run(manifest: &Path, json: bool) -> Result<u8, String> {
    let manifest = parse_manifest_file(manifest).map_err(|e| format!("manifest error: {e}"))?;

    if json {
        println!("{}", json_pretty(&manifest)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("manifest '{}' is valid", manifest.name());
    for (role, input) in manifest.inputs() {
        println!("  {:<5} {input}", colorize_role(role));
    }
    if !manifest.env_overrides().is_empty() {
        println!("  env:");
        for (key, value) in manifest.env_overrides().iter() {
            println!("    {key}={value}");
        }
    }
    Ok(EXIT_SUCCESS)
}
