use crate::layout::StoreLayout;
use crate::StoreError;
use rootshare_schema::ReportedDependency;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// The external call an intent was recorded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    CreateContainer,
    DestroyContainer,
    InstallPackage,
    UninstallPackage,
    RemoveOrphans,
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntentKind::CreateContainer => write!(f, "create"),
            IntentKind::DestroyContainer => write!(f, "destroy"),
            IntentKind::InstallPackage => write!(f, "install"),
            IntentKind::UninstallPackage => write!(f, "uninstall"),
            IntentKind::RemoveOrphans => write!(f, "remove-orphans"),
        }
    }
}

/// An external call that was started but whose bookkeeping has not been
/// committed yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub op_id: String,
    pub kind: IntentKind,
    pub container: String,
    #[serde(default)]
    pub packages: Vec<String>,
    pub timestamp: String,
    /// Set once an install succeeded: what to record for it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<InstallOutcome>,
}

/// The result of a finished package install, kept until its bookkeeping
/// commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallOutcome {
    pub package_type: String,
    pub dependencies: Vec<ReportedDependency>,
}

/// Journal of in-flight external calls.
///
/// Engine operations write an intent before calling the container engine or
/// package manager and remove it once the matching bookkeeping transaction
/// has committed. An intent that survives a crash marks the window in which
/// the external tool may have succeeded without the store knowing; the
/// reconciliation pass replays the bookkeeping it can and clears the rest.
pub struct IntentJournal {
    dir: PathBuf,
}

impl IntentJournal {
    pub fn new(layout: &StoreLayout) -> Self {
        Self {
            dir: layout.journal_dir(),
        }
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Record an intent. Returns its op_id.
    pub fn begin(
        &self,
        kind: IntentKind,
        container: &str,
        packages: &[String],
    ) -> Result<String, StoreError> {
        let now = chrono::Utc::now();
        let seed = format!("{kind}:{container}:{}", packages.join(","));
        let op_id = format!(
            "{}-{}",
            now.format("%Y%m%d%H%M%S%6f"),
            &blake3::hash(seed.as_bytes()).to_hex()[..8]
        );
        let intent = Intent {
            op_id: op_id.clone(),
            kind,
            container: container.to_owned(),
            packages: packages.to_vec(),
            timestamp: now.to_rfc3339(),
            outcome: None,
        };
        self.write_intent(&intent)?;
        debug!("journal begin: {kind} on {container} (op_id={op_id})");
        Ok(op_id)
    }

    /// Attach the result of a successful install to its intent, so the
    /// bookkeeping can be replayed if it never commits.
    pub fn record_outcome(&self, op_id: &str, outcome: InstallOutcome) -> Result<(), StoreError> {
        let content = fs::read_to_string(self.intent_path(op_id))?;
        let mut intent: Intent = serde_json::from_str(&content)?;
        intent.outcome = Some(outcome);
        self.write_intent(&intent)?;
        debug!("journal outcome recorded: {op_id}");
        Ok(())
    }

    /// Remove an intent once its bookkeeping is durable.
    pub fn commit(&self, op_id: &str) -> Result<(), StoreError> {
        let path = self.intent_path(op_id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("journal commit: {op_id}");
        }
        Ok(())
    }

    /// Drop an intent without completing it (the external call failed, or a
    /// reconciliation pass has dealt with it).
    pub fn clear(&self, op_id: &str) -> Result<(), StoreError> {
        let path = self.intent_path(op_id);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("journal clear: {op_id}");
        }
        Ok(())
    }

    /// All intents still on disk, oldest first. Unreadable files are skipped
    /// and removed.
    pub fn list_incomplete(&self) -> Result<Vec<Intent>, StoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut intents = Vec::new();
        for dir_entry in fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(StoreError::from)
                .and_then(|content| serde_json::from_str::<Intent>(&content).map_err(StoreError::from));
            match parsed {
                Ok(intent) => intents.push(intent),
                Err(e) => {
                    warn!("corrupt journal entry {}: {e}", path.display());
                    let _ = fs::remove_file(&path);
                }
            }
        }
        intents.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(intents)
    }

    fn intent_path(&self, op_id: &str) -> PathBuf {
        self.dir.join(format!("{op_id}.json"))
    }

    fn write_intent(&self, intent: &Intent) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)?;
        let content = serde_json::to_string_pretty(intent)?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.intent_path(&intent.op_id))
            .map_err(|e| StoreError::Io(e.error))?;
        crate::fsync_dir(&self.dir)?;
        Ok(())
    }
}
