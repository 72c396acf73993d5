use rootshare_schema::{DepType, PackageName, ReportedDependency};
use rootshare_store::{DependencyEdge, RootScope, StoreError, StoreTx};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Outcome of recording a batch of reported dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub recorded: usize,
    /// Edges that were already present and left as they were.
    pub duplicates: usize,
}

/// Dependency edge bookkeeping and root-wide orphan detection.
///
/// A dependency is orphaned on a root when no edge owned by any container or
/// placeholder on that root names it any more, and no member of the root has
/// it registered as an explicitly installed package. Whether the package
/// manager itself still needs it is not visible here; callers cross-check
/// before removing anything.
pub struct DependencyLedger<'a, 'conn> {
    tx: &'a StoreTx<'conn>,
}

impl<'a, 'conn> DependencyLedger<'a, 'conn> {
    pub fn new(tx: &'a StoreTx<'conn>) -> Self {
        Self { tx }
    }

    /// Insert one edge. Fails with [`StoreError::DuplicateEdge`] when it exists.
    pub fn record_dependency(
        &self,
        container: &str,
        package: &str,
        dependency: &str,
        dep_type: DepType,
    ) -> Result<(), StoreError> {
        self.tx
            .add_dependency(package, container, dependency, dep_type)
    }

    /// Record every reported edge, treating duplicates as no-ops.
    pub fn record_all(
        &self,
        container: &str,
        deps: &[ReportedDependency],
    ) -> Result<RecordSummary, StoreError> {
        let mut summary = RecordSummary::default();
        for dep in deps {
            match self.record_dependency(container, &dep.package, &dep.dependency, dep.dep_type) {
                Ok(()) => summary.recorded += 1,
                Err(StoreError::DuplicateEdge { .. }) => {
                    debug!("edge {} -> {} already recorded in {container}", dep.package, dep.dependency);
                    summary.duplicates += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    /// Drop every edge owned by `package` in `container` and return the
    /// dependencies left without any reference on `scope`.
    pub fn remove_package(
        &self,
        scope: &RootScope,
        container: &str,
        package: &str,
    ) -> Result<BTreeSet<PackageName>, StoreError> {
        let edges = self.tx.remove_dependencies_for_package(container, package)?;
        self.orphans_among(scope, &edges)
    }

    /// Drop every edge owned by `container` and return the dependencies left
    /// without any reference on `scope`.
    pub fn remove_container(
        &self,
        scope: &RootScope,
        container: &str,
    ) -> Result<BTreeSet<PackageName>, StoreError> {
        let edges = self.tx.remove_dependencies_for_container(container)?;
        self.orphans_among(scope, &edges)
    }

    /// Of the dependencies named by `released`, those nothing on `scope`
    /// still references. Each dependency is checked once, after every
    /// edge in `released` is gone.
    pub fn orphans_among(
        &self,
        scope: &RootScope,
        released: &[DependencyEdge],
    ) -> Result<BTreeSet<PackageName>, StoreError> {
        let candidates: BTreeSet<&PackageName> = released.iter().map(|e| &e.dependency).collect();
        let mut orphaned = BTreeSet::new();
        for dependency in candidates {
            if self.is_orphaned(scope, dependency)? {
                orphaned.insert(dependency.clone());
            }
        }
        debug!(
            "{} of {} released edges left orphans on {scope}",
            orphaned.len(),
            released.len()
        );
        Ok(orphaned)
    }

    pub fn is_orphaned(&self, scope: &RootScope, dependency: &str) -> Result<bool, StoreError> {
        Ok(self.tx.dependents_of(scope, dependency)? == 0
            && !self.tx.is_package_on_root(scope, dependency)?)
    }
}
