use super::{join, json_pretty, print_cleanup, CliError, EXIT_FAILURE, EXIT_SUCCESS};
use rootshare_core::Engine;

pub fn run(engine: &Engine, dry_run: bool, json: bool) -> Result<u8, CliError> {
    let report = engine.reconcile(dry_run)?;
    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        let prefix = if dry_run { "would repair" } else { "repaired" };
        println!(
            "reconcile: {prefix} {} missing containers, {} unowned rows, {} stranded placeholders, {} interrupted operations",
            report.missing_containers.len(),
            report.unowned_edges + report.unowned_packages,
            report.purged_placeholders.len(),
            report.incomplete_intents.len()
        );
        if !report.missing_containers.is_empty() {
            println!("missing from the engine: {}", join(&report.missing_containers));
        }
        if !report.purged_placeholders.is_empty() {
            println!("placeholders: {}", join(&report.purged_placeholders));
        }
        for intent in &report.incomplete_intents {
            println!(
                "interrupted {} of '{}' at {}",
                intent.kind, intent.container, intent.timestamp
            );
        }
        for intent in &report.replayed_intents {
            println!(
                "recorded interrupted {} of {} in '{}'",
                intent.kind,
                join(&intent.packages),
                intent.container
            );
        }
        for intent in &report.unresolved_intents {
            println!(
                "kept interrupted {} of '{}' for the next run",
                intent.kind, intent.container
            );
        }
        for cleanup in &report.orphan_cleanup {
            print_cleanup(cleanup);
        }
        if !report.skipped_locked.is_empty() {
            println!("skipped (locked): {}", join(&report.skipped_locked));
        }
        if report.interrupted {
            println!("interrupted; run reconcile again to finish");
        }
    }
    Ok(
        if report.interrupted || !report.unresolved_intents.is_empty() {
            EXIT_FAILURE
        } else {
            EXIT_SUCCESS
        },
    )
}
