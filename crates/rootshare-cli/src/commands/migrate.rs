use super::{json_pretty, CliError, EXIT_SUCCESS};
use rootshare_core::Engine;
use rootshare_store::{latest_version, StoreLayout};

pub fn run(layout: &StoreLayout, json_output: bool) -> Result<u8, CliError> {
    let db_path = layout.db_path();
    if !db_path.exists() {
        msg(
            json_output,
            &serde_json::json!({"status": "no_store", "message": "No state database found."}),
            &format!(
                "No state database at {}. Nothing to migrate.",
                db_path.display()
            ),
        )?;
        return Ok(EXIT_SUCCESS);
    }

    match Engine::migrate(layout)? {
        Some(result) => {
            let from = result.from_version.as_deref().unwrap_or("<none>");
            let backup = result
                .backup_path
                .as_ref()
                .map_or_else(|| "(none)".to_owned(), |p| p.display().to_string());
            msg(
                json_output,
                &serde_json::json!({
                    "status": "migrated",
                    "from": result.from_version,
                    "to": result.to_version,
                    "applied": result.applied,
                    "backup": result.backup_path,
                }),
                &format!(
                    "Migrated state database from v{from} to v{}.\nApplied: {}\nBackup: {backup}",
                    result.to_version,
                    result.applied.join(", ")
                ),
            )?;
        }
        None => {
            let current = latest_version();
            msg(
                json_output,
                &serde_json::json!({"status": "current", "schema_version": current}),
                &format!("Schema version: {current} (current)\nNo migration needed."),
            )?;
        }
    }
    Ok(EXIT_SUCCESS)
}

fn msg(json_output: bool, json: &serde_json::Value, human: &str) -> Result<(), String> {
    if json_output {
        println!("{}", json_pretty(json)?);
    } else {
        println!("{human}");
    }
    Ok(())
}
