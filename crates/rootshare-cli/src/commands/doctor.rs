use super::{json_pretty, CliError, EXIT_FAILURE, EXIT_SUCCESS};
use rootshare_core::RootLock;
use rootshare_schema::Settings;
use rootshare_store::{
    latest_version, verify_store_integrity, ContainerFilter, IntentJournal, Store, StoreError,
    StoreLayout,
};

pub fn run(settings: &Settings, layout: &StoreLayout, json_output: bool) -> Result<u8, CliError> {
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_prereqs(settings, &mut checks, &mut all_pass);
    check_distributions(settings, &mut checks, &mut all_pass);

    if layout.db_path().exists() {
        checks.push(Check::pass("store_exists", "State database exists"));
        check_store(layout, &mut checks, &mut all_pass);
        check_journal(layout, &mut checks);
        check_locks(layout, &mut checks);
    } else {
        checks.push(Check::info(
            "store_exists",
            "State database not initialized (will be created on first use)",
        ));
    }

    print_results(&checks, all_pass, json_output)
}

fn check_prereqs(settings: &Settings, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing = rootshare_runtime::check_engine_prereqs(&settings.engine);
    if missing.is_empty() {
        checks.push(Check::pass(
            "engine_prereqs",
            &format!("Container engine '{}' is available", settings.engine),
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail(
            "engine_prereqs",
            &rootshare_runtime::format_missing(&missing),
        ));
    }
}

fn check_distributions(settings: &Settings, checks: &mut Vec<Check>, all_pass: &mut bool) {
    for name in settings.distributions.keys() {
        if let Err(e) = settings.distribution(name) {
            *all_pass = false;
            checks.push(Check::fail("distributions", &e.to_string()));
        }
    }
    checks.push(Check::info(
        "distributions",
        &format!(
            "{} built-in presets, {} configured distributions",
            rootshare_schema::list_distros().len(),
            settings.distributions.len()
        ),
    ));
}

fn check_store(layout: &StoreLayout, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let store = match Store::open_unchecked(layout) {
        Ok(store) => store,
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_open",
                &format!("Cannot open state database: {e}"),
            ));
            return;
        }
    };

    match store.schema_version() {
        Ok(Some(version)) if version == latest_version() => checks.push(Check::pass(
            "schema_version",
            &format!("Schema version {version} is current"),
        )),
        Ok(found) => {
            *all_pass = false;
            checks.push(Check::fail(
                "schema_version",
                &format!(
                    "Schema version {} differs from {}; run `rootshare migrate`",
                    found.as_deref().unwrap_or("<none>"),
                    latest_version()
                ),
            ));
            return;
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "schema_version",
                &format!("Cannot read schema version: {e}"),
            ));
            return;
        }
    }

    match verify_store_integrity(&store) {
        Ok(report) if report.is_clean() => checks.push(Check::pass(
            "store_integrity",
            &format!(
                "Store integrity OK ({} containers, {} edges, {} packages checked)",
                report.containers_checked, report.dependencies_checked, report.packages_checked
            ),
        )),
        Ok(report) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_integrity",
                &format!(
                    "{} integrity violations; run `rootshare reconcile`",
                    report.failed.len()
                ),
            ));
        }
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_integrity",
                &format!("Integrity check failed: {e}"),
            ));
        }
    }

    let counts = store.read(|tx| {
        let filter = ContainerFilter::default();
        Ok::<_, StoreError>((
            tx.list_containers(&filter)?.len(),
            tx.list_destroyed(&filter)?.len(),
        ))
    });
    match counts {
        Ok((active, destroyed)) => checks.push(Check::info(
            "containers",
            &format!("{active} containers ({destroyed} destroyed placeholders)"),
        )),
        Err(e) => checks.push(Check::warn(
            "containers",
            &format!("Cannot list containers: {e}"),
        )),
    }
}

fn check_journal(layout: &StoreLayout, checks: &mut Vec<Check>) {
    match IntentJournal::new(layout).list_incomplete() {
        Ok(intents) if intents.is_empty() => checks.push(Check::pass(
            "journal_clean",
            "Intent journal is clean",
        )),
        Ok(intents) => checks.push(Check::warn(
            "journal_clean",
            &format!(
                "{} interrupted operations; run `rootshare reconcile`",
                intents.len()
            ),
        )),
        Err(e) => checks.push(Check::warn(
            "journal_clean",
            &format!("Cannot read intent journal: {e}"),
        )),
    }
}

fn check_locks(layout: &StoreLayout, checks: &mut Vec<Check>) {
    let Ok(entries) = std::fs::read_dir(layout.locks_dir()) else {
        return;
    };
    let mut held = 0usize;
    for entry in entries.flatten() {
        match RootLock::try_acquire(&entry.path()) {
            Ok(Some(_)) => {}
            Ok(None) => held += 1,
            Err(e) => checks.push(Check::warn(
                "root_locks",
                &format!("Cannot check {}: {e}", entry.path().display()),
            )),
        }
    }
    if held == 0 {
        checks.push(Check::pass("root_locks", "No root lock is held"));
    } else {
        checks.push(Check::warn(
            "root_locks",
            &format!("{held} root locks are held by running operations"),
        ));
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, CliError> {
    if json_output {
        let json = serde_json::json!({
            "healthy": all_pass,
            "checks": checks.iter().map(|c| serde_json::json!({
                "name": c.name,
                "status": c.status,
                "message": c.message,
            })).collect::<Vec<_>>(),
        });
        println!("{}", json_pretty(&json)?);
    } else {
        println!("rootshare doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
