//! Repair pass for the window between a successful external call and its
//! bookkeeping commit.

use crate::concurrency::shutdown_requested;
use crate::engine::{Engine, OrphanCleanup};
use crate::reconciler::{DestroyOutcome, Reconciler};
use crate::tracker::RootTracker;
use crate::CoreError;
use rootshare_schema::ContainerName;
use rootshare_store::{ContainerFilter, InstallOutcome, Intent, IntentKind, RootScope, StoreError};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub dry_run: bool,
    /// Active rows the container engine no longer knows.
    pub missing_containers: Vec<ContainerName>,
    /// Destroy bookkeeping applied to those rows.
    pub destroyed: Vec<DestroyOutcome>,
    pub orphan_cleanup: Vec<OrphanCleanup>,
    pub unowned_edges: usize,
    pub unowned_packages: usize,
    /// Placeholders on roots without any active container.
    pub purged_placeholders: Vec<ContainerName>,
    pub incomplete_intents: Vec<Intent>,
    /// Interrupted installs and uninstalls whose bookkeeping was committed.
    pub replayed_intents: Vec<Intent>,
    /// Intents kept in the journal because replaying them failed.
    pub unresolved_intents: Vec<Intent>,
    /// Scopes left alone because another operation held their lock.
    pub skipped_locked: Vec<String>,
    pub interrupted: bool,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.missing_containers.is_empty()
            && self.unowned_edges == 0
            && self.unowned_packages == 0
            && self.purged_placeholders.is_empty()
            && self.incomplete_intents.is_empty()
            && self.skipped_locked.is_empty()
    }
}

enum Replay {
    Committed(OrphanCleanup),
    Dropped,
}

impl Engine {
    /// Cross-check the bookkeeping against the journal and the container
    /// engine, and repair it.
    ///
    /// Interrupted installs and uninstalls of still active containers get
    /// their bookkeeping committed; other leftover intents are cleared. Active
    /// containers the engine no longer has go through destroy bookkeeping;
    /// edges and registrations owned by unknown names are deleted;
    /// placeholders on roots without an active container are purged. With
    /// `dry_run` nothing is changed and the report lists what would be done.
    pub fn reconcile(&self, dry_run: bool) -> Result<ReconcileReport, CoreError> {
        info!("running reconciliation pass (dry_run={dry_run})");
        let mut report = ReconcileReport {
            dry_run,
            ..ReconcileReport::default()
        };

        report.incomplete_intents = self.journal.list_incomplete()?;
        if !dry_run {
            for intent in &report.incomplete_intents {
                if shutdown_requested() {
                    report.interrupted = true;
                    return Ok(report);
                }
                match self.replay_intent(intent) {
                    Ok(Replay::Committed(cleanup)) => {
                        self.journal.clear(&intent.op_id)?;
                        if cleanup.via.is_some() {
                            report.orphan_cleanup.push(cleanup);
                        }
                        report.replayed_intents.push(intent.clone());
                    }
                    Ok(Replay::Dropped) => self.journal.clear(&intent.op_id)?,
                    Err(CoreError::RootLockContention { scope }) => {
                        report.skipped_locked.push(scope);
                        report.unresolved_intents.push(intent.clone());
                    }
                    Err(e) => {
                        warn!("could not replay {} on {}: {e}", intent.kind, intent.container);
                        report.unresolved_intents.push(intent.clone());
                    }
                }
            }
        }

        let active = self
            .store
            .read(|tx| tx.list_containers(&ContainerFilter::default()))?;
        for record in active {
            if shutdown_requested() {
                report.interrupted = true;
                return Ok(report);
            }
            if self.containers.exists(&record.name)? {
                continue;
            }
            warn!("container {} is recorded but missing from the engine", record.name);
            report.missing_containers.push(record.name.clone());
            if dry_run {
                continue;
            }
            let scope = record.scope();
            let outcome = match self.lock_scope(&scope) {
                Ok(_lock) => self
                    .store
                    .transaction(|tx| Reconciler::new(tx).destroy(&record.name))?,
                Err(CoreError::RootLockContention { scope }) => {
                    report.skipped_locked.push(scope);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let cleanup = self.cleanup_orphans(&outcome.scope, &outcome.orphaned);
            if cleanup.via.is_some() {
                report.orphan_cleanup.push(cleanup);
            }
            report.destroyed.push(outcome);
        }

        let (edges, packages) = if dry_run {
            self.store.read(|tx| tx.count_unowned_rows())?
        } else {
            self.store.transaction(|tx| tx.delete_unowned_rows())?
        };
        report.unowned_edges = edges;
        report.unowned_packages = packages;

        let scopes: BTreeSet<RootScope> = self
            .store
            .read(|tx| tx.list_destroyed(&ContainerFilter::default()))?
            .iter()
            .map(|placeholder| placeholder.scope())
            .collect();
        for scope in scopes {
            if shutdown_requested() {
                report.interrupted = true;
                return Ok(report);
            }
            if dry_run {
                let stranded = self.store.read(|tx| {
                    if RootTracker::new(tx).active_count(&scope)? > 0 {
                        return Ok(Vec::new());
                    }
                    let (_, destroyed) = tx.scope_members(&scope)?;
                    Ok::<_, StoreError>(destroyed.into_iter().map(|p| p.name).collect())
                })?;
                report.purged_placeholders.extend(stranded);
                continue;
            }
            let purge = match self.lock_scope(&scope) {
                Ok(_lock) => self
                    .store
                    .transaction(|tx| Reconciler::new(tx).purge_unreferenced(&scope))?,
                Err(CoreError::RootLockContention { scope }) => {
                    report.skipped_locked.push(scope);
                    continue;
                }
                Err(e) => return Err(e),
            };
            report.purged_placeholders.extend(purge.purged);
        }

        info!(
            "reconciliation done: {} missing containers, {} unowned rows, {} stranded placeholders, {} intents",
            report.missing_containers.len(),
            report.unowned_edges + report.unowned_packages,
            report.purged_placeholders.len(),
            report.incomplete_intents.len()
        );
        Ok(report)
    }

    /// Commit the bookkeeping of an interrupted install or uninstall.
    ///
    /// An install whose outcome never reached the journal is run again; the
    /// package manager treats an installed package as done and reports its
    /// dependencies. An uninstall is recorded as done.
    fn replay_intent(&self, intent: &Intent) -> Result<Replay, CoreError> {
        let package = match (intent.kind, intent.packages.first()) {
            (IntentKind::InstallPackage | IntentKind::UninstallPackage, Some(package)) => package,
            _ => {
                warn!(
                    "clearing interrupted {} on {} from {}",
                    intent.kind, intent.container, intent.timestamp
                );
                return Ok(Replay::Dropped);
            }
        };
        let Some(record) = self.store.read(|tx| tx.get_container(&intent.container))? else {
            warn!(
                "{} is gone; dropping its interrupted {} of {package}",
                intent.container, intent.kind
            );
            return Ok(Replay::Dropped);
        };

        if intent.kind == IntentKind::UninstallPackage {
            let bookkeeping = self.commit_uninstall(&record, package)?;
            info!("replayed uninstall of {package} from {}", record.name);
            return Ok(Replay::Committed(
                self.cleanup_orphans(&record.scope(), &bookkeeping.orphaned),
            ));
        }

        let outcome = match &intent.outcome {
            Some(outcome) => outcome.clone(),
            None => InstallOutcome {
                package_type: String::new(),
                dependencies: self.packages.install(&self.spec_for(&record), package)?,
            },
        };
        let summary =
            self.commit_install(&record, package, &outcome.package_type, &outcome.dependencies)?;
        info!(
            "replayed install of {package} in {}: {} new edges",
            record.name, summary.recorded
        );
        Ok(Replay::Committed(OrphanCleanup::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CreateRequest;
    use crate::RootLock;
    use rootshare_runtime::{MockCatalog, MockEngine, MockPackageManager};
    use rootshare_schema::{Settings, SharedRoot};
    use rootshare_store::{PackageFilter, StoreLayout};
    use std::sync::Arc;

    fn setup(dir: &std::path::Path) -> (Engine, Arc<MockEngine>) {
        let containers = Arc::new(MockEngine::new());
        let engine = Engine::with_runtime(
            StoreLayout::new(dir),
            Settings::default(),
            containers.clone(),
            Arc::new(MockPackageManager::with_catalog(
                MockCatalog::default().with_package("foo", &["libx"]),
            )),
        )
        .unwrap();
        (engine, containers)
    }

    fn hold_root(engine: &Engine, root: &str) -> RootLock {
        let scope = RootScope::Shared(SharedRoot::from(root));
        RootLock::acquire(&engine.layout().root_lock_file(&scope.key())).unwrap()
    }

    fn packages_of(engine: &Engine, container: &str) -> Vec<String> {
        engine
            .list_packages(&PackageFilter {
                container: Some(container.to_owned()),
                ..PackageFilter::default()
            })
            .unwrap()
            .into_iter()
            .map(|p| p.name.to_string())
            .collect()
    }

    fn create(engine: &Engine, name: &str, root: &str) {
        engine
            .create_container(CreateRequest {
                name: name.to_owned(),
                distribution: "arch".to_owned(),
                shared_root: Some(SharedRoot::from(root)),
                configuration: "{}".to_owned(),
            })
            .unwrap();
    }

    #[test]
    fn clean_store_reconciles_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = setup(dir.path());
        create(&engine, "a", "/r");
        let report = engine.reconcile(false).unwrap();
        assert!(report.is_clean());
        assert!(!report.interrupted);
    }

    #[test]
    fn dry_run_reports_without_changes() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, containers) = setup(dir.path());
        create(&engine, "a", "/r");
        containers.remove_externally("a").unwrap();
        engine
            .journal
            .begin(IntentKind::InstallPackage, "a", &["foo".to_owned()])
            .unwrap();

        let report = engine.reconcile(true).unwrap();
        assert_eq!(report.missing_containers, vec![ContainerName::from("a")]);
        assert!(report.destroyed.is_empty());
        assert_eq!(report.incomplete_intents.len(), 1);
        assert_eq!(engine.list_containers(false).unwrap().len(), 1);
        assert_eq!(engine.pending_intents().unwrap().len(), 1);
    }

    #[test]
    fn missing_containers_are_destroyed_and_intents_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, containers) = setup(dir.path());
        create(&engine, "a", "/r");
        create(&engine, "b", "/r");
        containers.remove_externally("a").unwrap();
        containers.remove_externally("b").unwrap();
        engine
            .journal
            .begin(IntentKind::DestroyContainer, "a", &[])
            .unwrap();

        let report = engine.reconcile(false).unwrap();
        assert_eq!(report.destroyed.len(), 2);
        assert!(report.replayed_intents.is_empty());
        assert!(engine.list_containers(true).unwrap().is_empty());
        assert!(engine.pending_intents().unwrap().is_empty());
        assert!(engine.reconcile(false).unwrap().is_clean());
    }

    #[test]
    fn interrupted_install_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = setup(dir.path());
        create(&engine, "a", "/r");

        let held = hold_root(&engine, "/r");
        let err = engine.install_package("a", "foo", Some("bar")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::RootLockContention);

        let report = engine.reconcile(false).unwrap();
        assert_eq!(report.unresolved_intents.len(), 1);
        assert_eq!(report.skipped_locked, vec!["/r".to_owned()]);
        assert!(packages_of(&engine, "a").is_empty());
        drop(held);

        let report = engine.reconcile(false).unwrap();
        assert_eq!(report.replayed_intents.len(), 1);
        assert!(report.unresolved_intents.is_empty());
        assert!(engine.pending_intents().unwrap().is_empty());
        let info = engine.inspect("a").unwrap();
        assert_eq!(info.dependencies.len(), 1);
        let packages = engine.list_packages(&PackageFilter::default()).unwrap();
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].package_type, "optional(bar)");
    }

    #[test]
    fn install_without_outcome_is_run_again() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = setup(dir.path());
        create(&engine, "a", "/r");
        engine
            .journal
            .begin(IntentKind::InstallPackage, "a", &["foo".to_owned()])
            .unwrap();

        let report = engine.reconcile(false).unwrap();
        assert_eq!(report.replayed_intents.len(), 1);
        assert_eq!(packages_of(&engine, "a"), vec!["foo".to_owned()]);
        assert_eq!(engine.inspect("a").unwrap().dependencies.len(), 1);
    }

    #[test]
    fn interrupted_uninstall_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = setup(dir.path());
        create(&engine, "a", "/r");
        engine.install_package("a", "foo", None).unwrap();
        engine
            .journal
            .begin(IntentKind::UninstallPackage, "a", &["foo".to_owned()])
            .unwrap();

        let report = engine.reconcile(false).unwrap();
        assert_eq!(report.replayed_intents.len(), 1);
        assert!(packages_of(&engine, "a").is_empty());
        assert!(engine.inspect("a").unwrap().dependencies.is_empty());
        assert_eq!(report.orphan_cleanup.len(), 1);
        assert_eq!(report.orphan_cleanup[0].removed.len(), 1);
        assert!(engine.pending_intents().unwrap().is_empty());
    }

    #[test]
    fn intents_of_gone_containers_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = setup(dir.path());
        engine
            .journal
            .begin(IntentKind::InstallPackage, "ghost", &["foo".to_owned()])
            .unwrap();

        let report = engine.reconcile(false).unwrap();
        assert_eq!(report.incomplete_intents.len(), 1);
        assert!(report.replayed_intents.is_empty());
        assert!(report.unresolved_intents.is_empty());
        assert!(engine.pending_intents().unwrap().is_empty());
    }
}
