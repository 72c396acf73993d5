pub mod completions;
pub mod configure;
pub mod create;
pub mod destroy;
pub mod doctor;
pub mod inspect;
pub mod install;
pub mod list;
pub mod man_pages;
pub mod migrate;
pub mod packages;
pub mod reconcile;
pub mod uninstall;
pub mod verify_store;

use indicatif::{ProgressBar, ProgressStyle};
use rootshare_core::{CoreError, ErrorKind, OrphanCleanup};
use std::fmt::Display;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_REQUEST_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_LOCK_CONTENTION: u8 = 4;
pub const EXIT_EXTERNAL_TOOL: u8 = 5;

/// A failed command: what to print and how to exit.
#[derive(Debug)]
pub struct CliError {
    pub message: String,
    pub kind: Option<ErrorKind>,
    pub code: u8,
}

impl CliError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: Some(kind),
            code: exit_code(kind),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let kind = err.kind();
        let mut message = err.to_string();
        if kind == ErrorKind::SchemaVersionMismatch {
            message.push_str("\nrun `rootshare migrate` to upgrade the state database");
        }
        Self::new(kind, message)
    }
}

impl From<String> for CliError {
    fn from(message: String) -> Self {
        Self {
            message,
            kind: None,
            code: EXIT_FAILURE,
        }
    }
}

pub fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::InvalidRequest | ErrorKind::UnknownContainer => EXIT_REQUEST_ERROR,
        ErrorKind::SchemaVersionMismatch => EXIT_STORE_ERROR,
        ErrorKind::RootLockContention => EXIT_LOCK_CONTENTION,
        ErrorKind::ExternalToolFailure => EXIT_EXTERNAL_TOOL,
        ErrorKind::DuplicateEdge | ErrorKind::Internal => EXIT_FAILURE,
    }
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Run `op` behind a spinner unless JSON output was requested.
pub fn with_spinner<T>(
    json: bool,
    running: &str,
    done: &str,
    failed: &str,
    op: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, CliError> {
    let pb = if json { None } else { Some(spinner(running)) };
    match op() {
        Ok(value) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, done);
            }
            Ok(value)
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, failed);
            }
            Err(e.into())
        }
    }
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "active" => Style::new().green().apply_to(state).to_string(),
        "destroyed" => Style::new().yellow().apply_to(state).to_string(),
        "purged" => Style::new().dim().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}

pub fn join<T: Display>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|item| ToString::to_string(&item))
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn print_cleanup(cleanup: &OrphanCleanup) {
    if !cleanup.removed.is_empty() {
        println!("removed orphaned dependencies: {}", join(&cleanup.removed));
    }
    if !cleanup.retained.is_empty() {
        println!("kept (still required on the root): {}", join(&cleanup.retained));
    }
    if let Some(ref error) = cleanup.error {
        println!("orphan cleanup failed: {error}");
    }
}
