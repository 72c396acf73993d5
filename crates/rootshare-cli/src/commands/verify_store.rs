use super::{json_pretty, CliError, EXIT_STORE_ERROR, EXIT_SUCCESS};
use rootshare_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, CliError> {
    let report = engine.verify_store()?;

    if json {
        let payload = serde_json::json!({
            "schema_version": report.schema_version,
            "containers": report.containers_checked,
            "placeholders": report.destroyed_checked,
            "dependencies": report.dependencies_checked,
            "packages": report.packages_checked,
            "failed": report.failed,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "store integrity: schema {}, {} containers, {} placeholders, {} edges, {} packages checked",
            report.schema_version.as_deref().unwrap_or("<none>"),
            report.containers_checked,
            report.destroyed_checked,
            report.dependencies_checked,
            report.packages_checked
        );
        for f in &report.failed {
            println!("  FAIL {}: {}", f.subject, f.reason);
        }
    }

    if report.is_clean() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_STORE_ERROR)
    }
}
