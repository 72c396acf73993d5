//! Lifecycle decisions for containers sharing a root.
//!
//! The [`Reconciler`] runs inside one bookkeeping transaction and composes the
//! [`RootTracker`] and the [`DependencyLedger`]. It never calls external
//! tools; it returns what the caller has to do next (orphaned dependencies to
//! remove, whether a root became unused).
//!
//! A placeholder row is kept only while at least one *active* container still
//! uses its root. Destroying a container therefore moves it to the
//! placeholder table when another active container shares the root and
//! deletes it otherwise, taking any placeholders on that root with it.
//!
//! A placeholder keeps its package registrations and dependency edges: its
//! packages are still installed on the shared root. They leave the root when
//! a live container uninstalls the package, or with the placeholder itself.

use crate::ledger::{DependencyLedger, RecordSummary};
use crate::lifecycle::{validate_transition, ContainerState};
use crate::tracker::RootTracker;
use crate::CoreError;
use rootshare_schema::{ContainerName, PackageName, ReportedDependency};
use rootshare_store::{ContainerRecord, PackageRecord, RootScope, StoreError, StoreTx};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// What a destroy did to the bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct DestroyOutcome {
    pub container: ContainerRecord,
    pub scope: RootScope,
    pub state: ContainerState,
    /// Root-wide dependencies no longer referenced by any recorded edge.
    pub orphaned: BTreeSet<PackageName>,
    /// Placeholders on the same root purged along with the container.
    pub purged_placeholders: Vec<ContainerName>,
    /// Package registrations dropped with the rows that owned them.
    pub released_packages: Vec<PackageRecord>,
    /// The shared root is no longer referenced and may be removed from disk.
    pub root_released: bool,
}

/// What registering a new container replaced.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterOutcome {
    pub container: ContainerRecord,
    /// Bookkeeping of an active row with the same name that no longer had a
    /// running container behind it.
    pub replaced_stale: Option<DestroyOutcome>,
    pub replaced_placeholder: bool,
    /// Placeholder package registrations taken over by the new container.
    pub rehomed_packages: usize,
}

/// Placeholders purged because their root lost its last active container.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeOutcome {
    pub purged: Vec<ContainerName>,
    pub orphaned: BTreeSet<PackageName>,
    pub released_packages: Vec<PackageRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UninstallBookkeeping {
    /// The registration removed, if the package had been installed explicitly.
    pub registration: Option<PackageRecord>,
    pub orphaned: BTreeSet<PackageName>,
    /// Another member of the root still has the package registered or depends on it.
    pub still_needed: bool,
}

pub struct Reconciler<'a, 'conn> {
    tx: &'a StoreTx<'conn>,
}

impl<'a, 'conn> Reconciler<'a, 'conn> {
    pub fn new(tx: &'a StoreTx<'conn>) -> Self {
        Self { tx }
    }

    fn tracker(&self) -> RootTracker<'a, 'conn> {
        RootTracker::new(self.tx)
    }

    fn ledger(&self) -> DependencyLedger<'a, 'conn> {
        DependencyLedger::new(self.tx)
    }

    /// Record a freshly created container.
    ///
    /// An active row of the same name is stale (the engine just accepted the
    /// name). On the same shared root it is retired to a placeholder, so the
    /// root and its other placeholders stay as they are; anywhere else it goes
    /// through full destroy bookkeeping. A placeholder of the same name is
    /// then replaced: on the same root the new container takes over its
    /// registrations and edges, otherwise they are dropped.
    pub fn register_container(
        &self,
        record: &ContainerRecord,
    ) -> Result<RegisterOutcome, CoreError> {
        let replaced_stale = match self.tx.get_container(&record.name)? {
            Some(stale) if stale.shared_root.is_some() && stale.scope() == record.scope() => {
                info!("replacing stale registration of {} on {}", record.name, stale.scope());
                Some(self.retire(&stale)?)
            }
            Some(_) => {
                info!("replacing stale registration of {}", record.name);
                Some(self.destroy(&record.name)?)
            }
            None => None,
        };

        let mut replaced_placeholder = false;
        let mut rehomed_packages = 0;
        if let Some(placeholder) = self.tx.get_destroyed(&record.name)? {
            validate_transition(ContainerState::Destroyed, ContainerState::Purged)?;
            if placeholder.shared_root == record.shared_root {
                // Rows are keyed by name, so they carry over as they are.
                rehomed_packages = self.tx.rehome_packages(&placeholder.name, &record.name)?;
            } else {
                let edges = self.tx.remove_dependencies_for_container(&placeholder.name)?;
                self.tx.delete_packages_for_container(&placeholder.name)?;
                debug!(
                    "dropped {} edges of placeholder {} on {}",
                    edges.len(),
                    placeholder.name,
                    placeholder.scope()
                );
            }
            self.tx.delete_destroyed(&placeholder.name)?;
            replaced_placeholder = true;
        }

        self.tx.upsert_container(record)?;
        info!("registered container {} on {}", record.name, record.scope());
        Ok(RegisterOutcome {
            container: record.clone(),
            replaced_stale,
            replaced_placeholder,
            rehomed_packages,
        })
    }

    /// Retire an active container.
    ///
    /// With another active container on the same shared root the row becomes
    /// a placeholder (`Destroyed`) that keeps its registrations and edges, so
    /// nothing is orphaned. Otherwise the row, its registrations and edges and
    /// every placeholder on the root are removed (`Purged`) and the root-wide
    /// orphan set is returned.
    pub fn destroy(&self, name: &str) -> Result<DestroyOutcome, CoreError> {
        let record = self.tx.require_container(name)?;
        let scope = record.scope();
        let others_active = self.tracker().active_count(&scope)?.saturating_sub(1);

        if record.shared_root.is_some() && others_active > 0 {
            let outcome = self.retire(&record)?;
            info!(
                "container {name} destroyed; {others_active} active containers still use {scope}"
            );
            return Ok(outcome);
        }

        validate_transition(ContainerState::Active, ContainerState::Purged)?;
        let container = self.tx.delete_container(name)?;
        let mut released_packages = self.tx.delete_packages_for_container(name)?;
        let purge = self.purge_unreferenced(&scope)?;
        let mut orphaned = self.ledger().remove_container(&scope, name)?;
        orphaned.extend(purge.orphaned);
        released_packages.extend(purge.released_packages);

        let root_released = scope.shared_root().is_some();
        info!("container {name} purged from {scope}");
        if root_released {
            info!("shared root {scope} is no longer referenced");
        }
        Ok(DestroyOutcome {
            container,
            scope,
            state: ContainerState::Purged,
            orphaned,
            purged_placeholders: purge.purged,
            released_packages,
            root_released,
        })
    }

    fn retire(&self, record: &ContainerRecord) -> Result<DestroyOutcome, CoreError> {
        validate_transition(ContainerState::Active, ContainerState::Destroyed)?;
        let container = self.tx.move_container_to_destroyed(&record.name)?;
        Ok(DestroyOutcome {
            scope: container.scope(),
            container,
            state: ContainerState::Destroyed,
            orphaned: BTreeSet::new(),
            purged_placeholders: Vec::new(),
            released_packages: Vec::new(),
            root_released: false,
        })
    }

    /// Purge every placeholder on `scope` once no active container uses it.
    /// A no-op while the root still has an active container.
    pub fn purge_unreferenced(&self, scope: &RootScope) -> Result<PurgeOutcome, CoreError> {
        let (active, destroyed) = self.tx.scope_members(scope)?;
        if !active.is_empty() || destroyed.is_empty() {
            return Ok(PurgeOutcome::default());
        }

        let mut outcome = PurgeOutcome::default();
        let mut edges = Vec::new();
        for placeholder in destroyed {
            validate_transition(ContainerState::Destroyed, ContainerState::Purged)?;
            edges.extend(self.tx.remove_dependencies_for_container(&placeholder.name)?);
            outcome
                .released_packages
                .extend(self.tx.delete_packages_for_container(&placeholder.name)?);
            self.tx.delete_destroyed(&placeholder.name)?;
            info!("purged placeholder {} from {scope}", placeholder.name);
            outcome.purged.push(placeholder.name);
        }
        outcome.orphaned = self.ledger().orphans_among(scope, &edges)?;
        Ok(outcome)
    }

    /// Record a completed install: the reported edges (duplicates ignored)
    /// and the explicit registration of `package`.
    pub fn install_bookkeeping(
        &self,
        record: &ContainerRecord,
        package: &str,
        package_type: &str,
        deps: &[ReportedDependency],
    ) -> Result<RecordSummary, CoreError> {
        let summary = self.ledger().record_all(&record.name, deps)?;
        let mut registration =
            PackageRecord::new(package, record.name.clone(), record.shared_root.clone());
        registration.package_type = package_type.to_owned();
        self.tx.register_package(&registration)?;
        Ok(summary)
    }

    /// Whether anything on the container's root other than `container`'s own
    /// registration still needs `package`: a recorded edge naming it, or an
    /// explicit install by another active container. Placeholder
    /// registrations do not count.
    pub fn package_needed_elsewhere(
        &self,
        record: &ContainerRecord,
        package: &str,
    ) -> Result<bool, StoreError> {
        let scope = record.scope();
        if self.tx.dependents_of(&scope, package)? > 0 {
            return Ok(true);
        }
        let (active, _) = self.tx.scope_members(&scope)?;
        for member in &active {
            if member.name == record.name {
                continue;
            }
            if self
                .tx
                .packages_of_container(&member.name)?
                .iter()
                .any(|p| p.name == package)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Record a completed uninstall of `package` from `record`'s container.
    ///
    /// When nothing else on a shared root needs the package it has left the
    /// root, so placeholder registrations and edges of it go too.
    pub fn uninstall_bookkeeping(
        &self,
        record: &ContainerRecord,
        package: &str,
    ) -> Result<UninstallBookkeeping, CoreError> {
        let scope = record.scope();
        let registration = self.tx.unregister_package(&record.name, package)?;
        let mut orphaned = self.ledger().remove_package(&scope, &record.name, package)?;
        let still_needed = self.package_needed_elsewhere(record, package)?;
        if let (false, Some(root)) = (still_needed, &record.shared_root) {
            let dropped = self.tx.unregister_placeholder_package(root, package)?;
            let edges = self.tx.remove_placeholder_dependencies_for_package(root, package)?;
            if !dropped.is_empty() || !edges.is_empty() {
                debug!(
                    "dropped {} placeholder registrations and {} edges of {package} on {scope}",
                    dropped.len(),
                    edges.len()
                );
            }
            orphaned.extend(self.ledger().orphans_among(&scope, &edges)?);
        }
        let purge = self.purge_unreferenced(&scope)?;
        orphaned.extend(purge.orphaned);
        debug!(
            "uninstall of {package} from {} leaves {} orphans",
            record.name,
            orphaned.len()
        );
        Ok(UninstallBookkeeping {
            registration,
            orphaned,
            still_needed,
        })
    }
}
