use crate::concurrency::RootLock;
use crate::ledger::{DependencyLedger, RecordSummary};
use crate::lifecycle::{state_of, ContainerState};
use crate::reconciler::{DestroyOutcome, Reconciler, RegisterOutcome, UninstallBookkeeping};
use crate::CoreError;
use rootshare_runtime::{
    select_engine, select_package_manager, ContainerEngine, ContainerSpec, PackageManager,
    RuntimeError,
};
use rootshare_schema::{
    optional_package_type, ContainerName, PackageName, ReportedDependency, Settings, SharedRoot,
};
use rootshare_store::{
    validate_container_name, verify_store_integrity, ContainerFilter, ContainerRecord,
    DependencyEdge, InstallOutcome, Intent, IntentJournal, IntentKind, IntegrityReport,
    MigrationResult, PackageFilter, PackageRecord, RootScope, Store, StoreError, StoreLayout,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The rootshare command surface.
///
/// Every mutating command follows the same shape: read what it needs, record
/// an intent in the journal, call the external engine or package manager with
/// no lock held, then take the root lock and commit the bookkeeping in one
/// transaction. A failed external call leaves the store untouched. A failed
/// bookkeeping step after a successful external call leaves the intent in the
/// journal for [`Engine::reconcile`] to replay.
pub struct Engine {
    pub(crate) layout: StoreLayout,
    pub(crate) settings: Settings,
    pub(crate) store: Store,
    pub(crate) journal: IntentJournal,
    pub(crate) containers: Arc<dyn ContainerEngine>,
    pub(crate) packages: Arc<dyn PackageManager>,
}

#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub name: String,
    pub distribution: String,
    pub shared_root: Option<SharedRoot>,
    /// Opaque blob stored with the container.
    pub configuration: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateResult {
    pub state: ContainerState,
    #[serde(flatten)]
    pub registration: RegisterOutcome,
    pub cleanup: OrphanCleanup,
}

#[derive(Debug, Clone, Serialize)]
pub struct DestroyResult {
    #[serde(flatten)]
    pub outcome: DestroyOutcome,
    /// The engine no longer knew the container; only bookkeeping was done.
    pub engine_missing: bool,
    pub cleanup: OrphanCleanup,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallResult {
    pub container: ContainerName,
    pub package: PackageName,
    pub package_type: String,
    pub dependencies: Vec<ReportedDependency>,
    #[serde(flatten)]
    pub summary: RecordSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct UninstallResult {
    pub container: ContainerName,
    pub package: PackageName,
    /// False when another container on the root still needs the package, so
    /// only the bookkeeping was updated.
    pub package_removed: bool,
    pub registration: Option<PackageRecord>,
    pub orphaned: BTreeSet<PackageName>,
    pub cleanup: OrphanCleanup,
}

/// Physical removal of orphan candidates after the ledger released them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrphanCleanup {
    /// Container the package manager ran in.
    pub via: Option<ContainerName>,
    pub removed: Vec<PackageName>,
    /// Candidates kept because the package manager or a newer edge still needs them.
    pub retained: Vec<PackageName>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerListing {
    #[serde(flatten)]
    pub container: ContainerRecord,
    pub state: ContainerState,
}

#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    #[serde(flatten)]
    pub container: ContainerRecord,
    pub state: ContainerState,
    pub scope: RootScope,
    pub packages: Vec<PackageRecord>,
    pub dependencies: Vec<DependencyEdge>,
    pub root_active: usize,
    pub root_references: usize,
}

impl Engine {
    /// Open the store under `layout` with the engine and package manager
    /// named in `settings`.
    pub fn new(layout: StoreLayout, settings: Settings) -> Result<Self, CoreError> {
        layout.initialize()?;
        let containers = select_engine(&settings.engine, layout.root())?;
        let packages = select_package_manager(Arc::clone(&containers), &settings, layout.root())?;
        Self::with_runtime(layout, settings, containers, packages)
    }

    pub fn with_runtime(
        layout: StoreLayout,
        settings: Settings,
        containers: Arc<dyn ContainerEngine>,
        packages: Arc<dyn PackageManager>,
    ) -> Result<Self, CoreError> {
        let store = Store::open(&layout)?;
        let journal = IntentJournal::new(&layout);
        journal.initialize()?;
        debug!(
            "engine ready: store {} with {} engine",
            layout.root().display(),
            containers.name()
        );
        Ok(Self {
            layout,
            settings,
            store,
            journal,
            containers,
            packages,
        })
    }

    /// Bring the store under `layout` to the current schema version.
    pub fn migrate(layout: &StoreLayout) -> Result<Option<MigrationResult>, CoreError> {
        let store = Store::open_unchecked(layout)?;
        Ok(store.migrate()?)
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn container_engine(&self) -> &dyn ContainerEngine {
        self.containers.as_ref()
    }

    /// Take the bookkeeping lock of `scope` or fail with
    /// [`CoreError::RootLockContention`].
    pub fn lock_scope(&self, scope: &RootScope) -> Result<RootLock, CoreError> {
        RootLock::try_acquire(&self.layout.root_lock_file(&scope.key()))?.ok_or_else(|| {
            CoreError::RootLockContention {
                scope: scope.to_string(),
            }
        })
    }

    pub(crate) fn spec_for(&self, record: &ContainerRecord) -> ContainerSpec {
        let image = self
            .settings
            .distribution(&record.distribution)
            .map(|c| c.image)
            .unwrap_or_default();
        ContainerSpec {
            name: record.name.to_string(),
            distribution: record.distribution.to_string(),
            image,
            shared_root: record.shared_root.clone(),
            configuration: record.configuration.clone(),
        }
    }

    fn require(&self, name: &str) -> Result<ContainerRecord, CoreError> {
        Ok(self.store.read(|tx| tx.require_container(name))?)
    }

    pub fn create_container(&self, request: CreateRequest) -> Result<CreateResult, CoreError> {
        info!(
            "creating container {} ({}) on {}",
            request.name,
            request.distribution,
            request
                .shared_root
                .as_ref()
                .map_or("a private root", SharedRoot::as_str)
        );
        validate_container_name(&request.name)?;
        let commands = self.settings.distribution(&request.distribution)?;

        let record = ContainerRecord::new(
            request.name.as_str(),
            request.distribution.as_str(),
            request.shared_root,
            request.configuration,
        );
        let mut spec = self.spec_for(&record);
        spec.image = commands.image;

        let op_id = self
            .journal
            .begin(IntentKind::CreateContainer, &request.name, &[])?;
        if let Err(e) = self.containers.create(&spec) {
            let _ = self.journal.clear(&op_id);
            return Err(e.into());
        }

        let registration = match self.register(&record) {
            Ok(registration) => registration,
            Err(e) => {
                warn!("bookkeeping for {} failed, removing the new container: {e}", record.name);
                if let Err(undo) = self.containers.destroy(&spec, true) {
                    warn!("could not remove container {}: {undo}", record.name);
                } else {
                    let _ = self.journal.clear(&op_id);
                }
                return Err(e);
            }
        };
        self.journal.commit(&op_id)?;

        let cleanup = match &registration.replaced_stale {
            Some(stale) => self.cleanup_orphans(&stale.scope, &stale.orphaned),
            None => OrphanCleanup::default(),
        };
        Ok(CreateResult {
            state: ContainerState::Active,
            registration,
            cleanup,
        })
    }

    fn register(&self, record: &ContainerRecord) -> Result<RegisterOutcome, CoreError> {
        let stale_scope = self
            .store
            .read(|tx| tx.get_container(&record.name))?
            .map(|stale| stale.scope())
            .filter(|scope| *scope != record.scope());

        let mut scopes: Vec<RootScope> = vec![record.scope()];
        scopes.extend(stale_scope);
        scopes.sort();
        let _locks = scopes
            .iter()
            .map(|scope| self.lock_scope(scope))
            .collect::<Result<Vec<_>, _>>()?;

        self.store
            .transaction(|tx| Reconciler::new(tx).register_container(record))
    }

    /// Destroy a container. Without `force`, a container the engine no longer
    /// has is an error unless an earlier destroy of it was interrupted after
    /// the engine call.
    pub fn destroy_container(&self, name: &str, force: bool) -> Result<DestroyResult, CoreError> {
        info!("destroying container {name} (force={force})");
        let record = self.require(name)?;
        let spec = self.spec_for(&record);
        drop(self.lock_scope(&record.scope())?);

        let interrupted: Vec<Intent> = self
            .journal
            .list_incomplete()?
            .into_iter()
            .filter(|i| i.kind == IntentKind::DestroyContainer && i.container == name)
            .collect();
        let op_id = self.journal.begin(IntentKind::DestroyContainer, name, &[])?;
        let mut engine_missing = false;
        match self.containers.destroy(&spec, force) {
            Ok(()) => {}
            Err(RuntimeError::ContainerNotFound(_)) if force || !interrupted.is_empty() => {
                warn!("engine has no container {name}; removing its bookkeeping only");
                engine_missing = true;
            }
            Err(e) => {
                let _ = self.journal.clear(&op_id);
                return Err(e.into());
            }
        }

        let outcome = {
            let _lock = self.lock_scope(&record.scope())?;
            self.store
                .transaction(|tx| Reconciler::new(tx).destroy(name))?
        };
        self.journal.commit(&op_id)?;
        for intent in &interrupted {
            self.journal.clear(&intent.op_id)?;
        }

        let cleanup = self.cleanup_orphans(&outcome.scope, &outcome.orphaned);
        Ok(DestroyResult {
            outcome,
            engine_missing,
            cleanup,
        })
    }

    /// Install `package`, optionally marked as an optional dependency of
    /// `optional_of`.
    pub fn install_package(
        &self,
        container: &str,
        package: &str,
        optional_of: Option<&str>,
    ) -> Result<InstallResult, CoreError> {
        info!("installing {package} in {container}");
        let record = self.require(container)?;
        let spec = self.spec_for(&record);

        let op_id = self
            .journal
            .begin(IntentKind::InstallPackage, container, &[package.to_owned()])?;
        let dependencies = match self.packages.install(&spec, package) {
            Ok(deps) => deps,
            Err(e) => {
                let _ = self.journal.clear(&op_id);
                return Err(e.into());
            }
        };

        let package_type = optional_of.map(optional_package_type).unwrap_or_default();
        self.journal.record_outcome(
            &op_id,
            InstallOutcome {
                package_type: package_type.clone(),
                dependencies: dependencies.clone(),
            },
        )?;
        let summary = self.commit_install(&record, package, &package_type, &dependencies)?;
        self.journal.commit(&op_id)?;

        info!(
            "{package} recorded in {container}: {} new edges, {} already known",
            summary.recorded, summary.duplicates
        );
        Ok(InstallResult {
            container: record.name,
            package: PackageName::from(package),
            package_type,
            dependencies,
            summary,
        })
    }

    pub fn uninstall_package(
        &self,
        container: &str,
        package: &str,
    ) -> Result<UninstallResult, CoreError> {
        info!("uninstalling {package} from {container}");
        let record = self.require(container)?;
        let spec = self.spec_for(&record);
        let needed = {
            let _lock = self.lock_scope(&record.scope())?;
            self.store
                .read(|tx| Reconciler::new(tx).package_needed_elsewhere(&record, package))?
        };

        let op_id = self
            .journal
            .begin(IntentKind::UninstallPackage, container, &[package.to_owned()])?;
        if needed {
            info!("{package} is still needed on {}; keeping it installed", record.scope());
        } else if let Err(e) = self.packages.uninstall(&spec, &[package.to_owned()]) {
            let _ = self.journal.clear(&op_id);
            return Err(e.into());
        }

        let bookkeeping = self.commit_uninstall(&record, package)?;
        self.journal.commit(&op_id)?;
        if needed != bookkeeping.still_needed {
            warn!("{package} changed owners on {} while it was being uninstalled", record.scope());
        }

        let cleanup = self.cleanup_orphans(&record.scope(), &bookkeeping.orphaned);
        Ok(UninstallResult {
            container: record.name,
            package: PackageName::from(package),
            package_removed: !needed,
            registration: bookkeeping.registration,
            orphaned: bookkeeping.orphaned,
            cleanup,
        })
    }

    /// Commit the bookkeeping of a finished install under the root lock.
    pub(crate) fn commit_install(
        &self,
        record: &ContainerRecord,
        package: &str,
        package_type: &str,
        dependencies: &[ReportedDependency],
    ) -> Result<RecordSummary, CoreError> {
        let _lock = self.lock_scope(&record.scope())?;
        self.store.transaction(|tx| {
            let record = tx.require_container(&record.name)?;
            Reconciler::new(tx).install_bookkeeping(&record, package, package_type, dependencies)
        })
    }

    /// Commit the bookkeeping of a finished uninstall under the root lock.
    pub(crate) fn commit_uninstall(
        &self,
        record: &ContainerRecord,
        package: &str,
    ) -> Result<UninstallBookkeeping, CoreError> {
        let _lock = self.lock_scope(&record.scope())?;
        self.store.transaction(|tx| {
            let record = tx.require_container(&record.name)?;
            Reconciler::new(tx).uninstall_bookkeeping(&record, package)
        })
    }

    /// Physically remove orphan candidates from `scope`, through any active
    /// container still using it. Nothing is removed from a root without an
    /// active container. Failures are reported in the result; the bookkeeping
    /// that produced the candidates is already committed.
    pub(crate) fn cleanup_orphans(
        &self,
        scope: &RootScope,
        orphaned: &BTreeSet<PackageName>,
    ) -> OrphanCleanup {
        if orphaned.is_empty() {
            return OrphanCleanup::default();
        }
        match self.try_cleanup_orphans(scope, orphaned) {
            Ok(cleanup) => cleanup,
            Err(e) => {
                warn!("orphan removal on {scope} failed: {e}");
                OrphanCleanup {
                    via: None,
                    removed: Vec::new(),
                    retained: orphaned.iter().cloned().collect(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    fn try_cleanup_orphans(
        &self,
        scope: &RootScope,
        orphaned: &BTreeSet<PackageName>,
    ) -> Result<OrphanCleanup, CoreError> {
        let (active, _) = self.store.read(|tx| tx.scope_members(scope))?;
        let Some(via) = active.into_iter().next() else {
            debug!("no active container left on {scope}; leaving orphans to the root");
            return Ok(OrphanCleanup::default());
        };
        let spec = self.spec_for(&via);

        let mut cleanup = OrphanCleanup {
            via: Some(via.name.clone()),
            ..OrphanCleanup::default()
        };
        let mut candidates = Vec::new();
        for dependency in orphaned {
            if self.packages.is_required_by_others(&spec, dependency)? {
                debug!("{dependency} is still required on {scope}");
                cleanup.retained.push(dependency.clone());
            } else {
                candidates.push(dependency.clone());
            }
        }

        // Edges recorded since the ledger released the candidates win.
        let removable: Vec<PackageName> = {
            let _lock = self.lock_scope(scope)?;
            self.store.read(|tx| {
                let ledger = DependencyLedger::new(tx);
                let mut removable = Vec::new();
                for dependency in candidates {
                    if ledger.is_orphaned(scope, &dependency)? {
                        removable.push(dependency);
                    } else {
                        cleanup.retained.push(dependency);
                    }
                }
                Ok::<_, StoreError>(removable)
            })?
        };
        if removable.is_empty() {
            return Ok(cleanup);
        }

        let names: Vec<String> = removable.iter().map(ToString::to_string).collect();
        let op_id = self
            .journal
            .begin(IntentKind::RemoveOrphans, &via.name, &names)?;
        if let Err(e) = self.packages.uninstall(&spec, &names) {
            let _ = self.journal.clear(&op_id);
            return Err(e.into());
        }
        self.journal.commit(&op_id)?;
        info!("removed {} orphaned dependencies from {scope}", names.len());
        cleanup.removed = removable;
        Ok(cleanup)
    }

    /// Active containers, followed by placeholders when `include_destroyed`.
    pub fn list_containers(
        &self,
        include_destroyed: bool,
    ) -> Result<Vec<ContainerListing>, CoreError> {
        self.filter_containers(&ContainerFilter::default(), include_destroyed)
    }

    pub fn filter_containers(
        &self,
        filter: &ContainerFilter,
        include_destroyed: bool,
    ) -> Result<Vec<ContainerListing>, CoreError> {
        Ok(self.store.read(|tx| {
            let mut listing: Vec<ContainerListing> = tx
                .list_containers(filter)?
                .into_iter()
                .map(|container| ContainerListing {
                    container,
                    state: ContainerState::Active,
                })
                .collect();
            if include_destroyed {
                listing.extend(tx.list_destroyed(filter)?.into_iter().map(|container| {
                    ContainerListing {
                        container,
                        state: ContainerState::Destroyed,
                    }
                }));
            }
            Ok::<_, StoreError>(listing)
        })?)
    }

    pub fn list_packages(&self, filter: &PackageFilter) -> Result<Vec<PackageRecord>, CoreError> {
        Ok(self.store.read(|tx| tx.list_package_records(filter))?)
    }

    /// Full bookkeeping of one container or placeholder.
    pub fn inspect(&self, name: &str) -> Result<Inspection, CoreError> {
        Ok(self.store.read(|tx| {
            let state = state_of(tx, name)?;
            let container = match state {
                ContainerState::Active => tx.require_container(name)?,
                ContainerState::Destroyed => tx
                    .get_destroyed(name)?
                    .ok_or_else(|| StoreError::UnknownContainer(name.to_owned()))?,
                ContainerState::Purged => {
                    return Err(StoreError::UnknownContainer(name.to_owned()))
                }
            };
            let scope = container.scope();
            let (active, destroyed) = tx.scope_members(&scope)?;
            Ok(Inspection {
                packages: tx.packages_of_container(name)?,
                dependencies: tx.dependencies_of_container(name)?,
                root_active: active.len(),
                root_references: active.len() + destroyed.len(),
                container,
                state,
                scope,
            })
        })?)
    }

    pub fn configuration(&self, name: &str) -> Result<String, CoreError> {
        Ok(self.require(name)?.configuration)
    }

    pub fn update_configuration(&self, name: &str, configuration: &str) -> Result<(), CoreError> {
        let record = self.require(name)?;
        let _lock = self.lock_scope(&record.scope())?;
        self.store
            .transaction(|tx| tx.update_configuration(name, configuration))?;
        info!("updated configuration of {name}");
        Ok(())
    }

    pub fn verify_store(&self) -> Result<IntegrityReport, CoreError> {
        Ok(verify_store_integrity(&self.store)?)
    }

    pub fn pending_intents(&self) -> Result<Vec<Intent>, CoreError> {
        Ok(self.journal.list_incomplete()?)
    }
}
