use rootshare_core::{ContainerState, CreateRequest, Engine, ErrorKind, RootLock};
use rootshare_runtime::{MockCatalog, MockEngine, MockPackageManager};
use rootshare_schema::{PackageName, Settings, SharedRoot};
use rootshare_store::{ContainerFilter, IntentJournal, IntentKind, RootScope, StoreLayout};
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;

struct Fixture {
    engine: Engine,
    containers: Arc<MockEngine>,
    packages: Arc<MockPackageManager>,
}

fn catalog() -> MockCatalog {
    MockCatalog::default()
        .with_package("foo", &["libx"])
        .with_package("bar", &["libx"])
        .with_package("baz", &["libz", "libx"])
}

fn fixture_with(dir: &Path, containers: Arc<MockEngine>, packages: Arc<MockPackageManager>) -> Fixture {
    let engine = Engine::with_runtime(
        StoreLayout::new(dir),
        Settings::default(),
        containers.clone(),
        packages.clone(),
    )
    .unwrap();
    Fixture {
        engine,
        containers,
        packages,
    }
}

fn fixture(dir: &Path) -> Fixture {
    fixture_with(
        dir,
        Arc::new(MockEngine::new()),
        Arc::new(MockPackageManager::with_catalog(catalog())),
    )
}

fn request(name: &str, root: Option<&str>) -> CreateRequest {
    CreateRequest {
        name: name.to_owned(),
        distribution: "arch".to_owned(),
        shared_root: root.map(SharedRoot::from),
        configuration: format!("{{\"container\":\"{name}\"}}"),
    }
}

fn names(set: impl IntoIterator<Item = PackageName>) -> Vec<String> {
    set.into_iter().map(PackageName::into_inner).collect()
}

// Two containers on one root pulling the same dependency.
#[test]
fn shared_dependency_survives_until_last_package_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", Some("/r"))).unwrap();
    f.engine.create_container(request("b", Some("/r"))).unwrap();
    f.engine.install_package("a", "foo", None).unwrap();
    f.engine.install_package("b", "bar", None).unwrap();

    let first = f.engine.uninstall_package("a", "foo").unwrap();
    assert!(first.package_removed);
    assert!(first.orphaned.is_empty());
    assert!(first.cleanup.removed.is_empty());

    let second = f.engine.uninstall_package("b", "bar").unwrap();
    assert_eq!(names(second.orphaned), ["libx"]);
    assert_eq!(names(second.cleanup.removed), ["libx"]);
    assert_eq!(f.packages.uninstalled(), ["foo", "bar", "libx"]);
}

#[test]
fn destroying_neighbor_leaves_other_container_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", Some("/r"))).unwrap();
    f.engine.create_container(request("b", Some("/r"))).unwrap();
    f.engine.install_package("a", "foo", None).unwrap();
    f.engine.install_package("b", "bar", None).unwrap();
    let before = f.engine.inspect("b").unwrap();

    let result = f.engine.destroy_container("a", false).unwrap();
    assert_eq!(result.outcome.state, ContainerState::Destroyed);
    assert!(result.outcome.orphaned.is_empty());
    assert!(!result.outcome.root_released);

    let after = f.engine.inspect("b").unwrap();
    assert_eq!(before.dependencies, after.dependencies);
    assert_eq!(after.root_active, 1);
    assert_eq!(after.root_references, 2);

    let placeholder = f.engine.inspect("a").unwrap();
    assert_eq!(placeholder.state, ContainerState::Destroyed);
    assert_eq!(placeholder.container.configuration, "{\"container\":\"a\"}");
    assert_eq!(placeholder.container.distribution, "arch");
    // foo is still on the shared root, so the placeholder keeps its edge.
    assert_eq!(placeholder.dependencies.len(), 1);
    assert_eq!(placeholder.packages.len(), 1);
}

#[test]
fn force_destroy_of_sole_container_purges_root() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", Some("/r"))).unwrap();
    f.engine.install_package("a", "baz", None).unwrap();

    let result = f.engine.destroy_container("a", true).unwrap();
    assert_eq!(result.outcome.state, ContainerState::Purged);
    assert!(result.outcome.root_released);
    assert_eq!(names(result.outcome.orphaned), ["libx", "libz"]);
    // Nothing is left on the root to run the package manager in.
    assert!(result.cleanup.via.is_none());
    assert!(f.engine.list_containers(true).unwrap().is_empty());
    assert_eq!(
        f.engine.inspect("a").unwrap_err().kind(),
        ErrorKind::UnknownContainer
    );
}

#[test]
fn placeholder_purged_when_last_active_container_goes() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    for name in ["a", "b", "c"] {
        f.engine.create_container(request(name, Some("/r"))).unwrap();
    }
    f.engine.destroy_container("a", false).unwrap();
    f.engine.destroy_container("b", false).unwrap();
    assert_eq!(f.engine.list_containers(true).unwrap().len(), 3);

    let last = f.engine.destroy_container("c", false).unwrap();
    assert_eq!(last.outcome.state, ContainerState::Purged);
    assert_eq!(last.outcome.purged_placeholders.len(), 2);
    assert!(f.engine.list_containers(true).unwrap().is_empty());
    assert!(f.engine.verify_store().unwrap().is_clean());
}

#[test]
fn placeholder_package_is_removed_through_remaining_container() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", Some("/r"))).unwrap();
    f.engine.create_container(request("b", Some("/r"))).unwrap();
    f.engine.install_package("a", "baz", None).unwrap();
    f.engine.install_package("b", "bar", None).unwrap();

    let result = f.engine.destroy_container("a", false).unwrap();
    assert!(result.outcome.orphaned.is_empty());
    assert!(result.cleanup.via.is_none());

    // baz is still on the root; uninstalling it from b takes the placeholder's
    // registration and edges with it.
    let removed = f.engine.uninstall_package("b", "baz").unwrap();
    assert!(removed.package_removed);
    assert_eq!(names(removed.orphaned), ["libz"]);
    assert_eq!(removed.cleanup.via.as_ref().map(|v| v.as_str()), Some("b"));
    assert_eq!(names(removed.cleanup.removed), ["libz"]);
    assert_eq!(f.packages.uninstalled(), ["baz", "libz"]);
    let placeholder = f.engine.inspect("a").unwrap();
    assert!(placeholder.packages.is_empty());
    assert!(placeholder.dependencies.is_empty());
    assert!(f.engine.verify_store().unwrap().is_clean());
}

#[test]
fn placeholder_registration_does_not_block_uninstall() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", Some("/r"))).unwrap();
    f.engine.create_container(request("b", Some("/r"))).unwrap();
    f.engine.install_package("a", "foo", None).unwrap();
    f.engine.install_package("b", "foo", None).unwrap();
    f.engine.destroy_container("a", false).unwrap();

    let result = f.engine.uninstall_package("b", "foo").unwrap();
    assert!(result.package_removed);
    assert_eq!(names(result.orphaned), ["libx"]);
    assert_eq!(f.packages.uninstalled(), ["foo", "libx"]);
}

#[test]
fn held_dependencies_are_retained() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", None)).unwrap();
    f.engine.install_package("a", "baz", None).unwrap();
    f.packages.hold("libx");

    let result = f.engine.uninstall_package("a", "baz").unwrap();
    assert_eq!(names(result.orphaned), ["libx", "libz"]);
    assert_eq!(names(result.cleanup.removed), ["libz"]);
    assert_eq!(names(result.cleanup.retained), ["libx"]);
}

#[test]
fn package_kept_while_neighbor_has_it_registered() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", Some("/r"))).unwrap();
    f.engine.create_container(request("b", Some("/r"))).unwrap();
    f.engine.install_package("a", "foo", None).unwrap();
    f.engine.install_package("b", "foo", None).unwrap();

    let result = f.engine.uninstall_package("a", "foo").unwrap();
    assert!(!result.package_removed);
    assert!(result.orphaned.is_empty());
    assert!(f.packages.uninstalled().is_empty());
}

#[test]
fn reinstall_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", None)).unwrap();
    let first = f.engine.install_package("a", "foo", None).unwrap();
    let second = f.engine.install_package("a", "foo", None).unwrap();
    assert_eq!(first.summary.recorded, 1);
    assert_eq!(second.summary.recorded, 0);
    assert_eq!(second.summary.duplicates, 1);
    assert_eq!(f.engine.inspect("a").unwrap().dependencies.len(), 1);
}

#[test]
fn failed_install_leaves_bookkeeping_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", None)).unwrap();
    f.packages.break_package("foo");

    let err = f.engine.install_package("a", "foo", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalToolFailure);
    let inspection = f.engine.inspect("a").unwrap();
    assert!(inspection.packages.is_empty());
    assert!(inspection.dependencies.is_empty());
    assert!(f.engine.pending_intents().unwrap().is_empty());
}

#[test]
fn failed_uninstall_leaves_bookkeeping_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", None)).unwrap();
    f.engine.install_package("a", "foo", None).unwrap();
    f.packages.break_package("foo");

    let err = f.engine.uninstall_package("a", "foo").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalToolFailure);
    let inspection = f.engine.inspect("a").unwrap();
    assert_eq!(inspection.packages.len(), 1);
    assert_eq!(inspection.dependencies.len(), 1);
}

#[test]
fn unknown_container_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    for err in [
        f.engine.destroy_container("ghost", true).unwrap_err(),
        f.engine.install_package("ghost", "foo", None).unwrap_err(),
        f.engine.uninstall_package("ghost", "foo").unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::UnknownContainer);
    }
}

#[test]
fn destroy_without_force_fails_when_engine_lost_container() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", None)).unwrap();
    f.containers.remove_externally("a").unwrap();

    let err = f.engine.destroy_container("a", false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExternalToolFailure);
    assert_eq!(f.engine.list_containers(false).unwrap().len(), 1);

    let forced = f.engine.destroy_container("a", true).unwrap();
    assert!(forced.engine_missing);
    assert_eq!(forced.outcome.state, ContainerState::Purged);
}

#[test]
fn recreate_replaces_stale_row_and_placeholder() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", Some("/r"))).unwrap();
    f.engine.create_container(request("b", Some("/r"))).unwrap();
    f.engine.install_package("a", "foo", None).unwrap();
    f.engine.destroy_container("a", false).unwrap();

    let recreated = f.engine.create_container(request("a", Some("/r"))).unwrap();
    assert!(recreated.registration.replaced_placeholder);
    assert_eq!(recreated.registration.rehomed_packages, 1);
    assert_eq!(f.engine.inspect("a").unwrap().state, ContainerState::Active);

    // The engine lost "b"; creating it again replaces the stale bookkeeping.
    f.engine.install_package("b", "baz", None).unwrap();
    f.containers.remove_externally("b").unwrap();
    let again = f.engine.create_container(request("b", Some("/r"))).unwrap();
    let stale = again.registration.replaced_stale.unwrap();
    assert_eq!(stale.state, ContainerState::Destroyed);
    assert!(!stale.root_released);
    assert!(stale.orphaned.is_empty());
    // baz is still on the shared root, so the new container inherits it.
    let b = f.engine.inspect("b").unwrap();
    assert_eq!(b.packages.len(), 1);
    assert_eq!(b.dependencies.len(), 2);
    assert!(f.engine.verify_store().unwrap().is_clean());
    assert!(f.packages.uninstalled().is_empty());
}

#[test]
fn lock_contention_is_reported_and_state_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", Some("/r"))).unwrap();
    let scope = RootScope::Shared(SharedRoot::from("/r"));
    let held = RootLock::acquire(&f.engine.layout().root_lock_file(&scope.key())).unwrap();

    let err = f.engine.update_configuration("a", "{}").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RootLockContention);
    assert_ne!(f.engine.configuration("a").unwrap(), "{}");

    drop(held);
    f.engine.update_configuration("a", "{}").unwrap();
}

#[test]
fn bookkeeping_failure_after_install_keeps_intent() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", Some("/r"))).unwrap();
    let scope = RootScope::Shared(SharedRoot::from("/r"));
    let _held = RootLock::acquire(&f.engine.layout().root_lock_file(&scope.key())).unwrap();

    let err = f.engine.install_package("a", "foo", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RootLockContention);
    let pending = f.engine.pending_intents().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].packages, ["foo"]);
}

#[test]
fn reconcile_records_install_interrupted_before_bookkeeping() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", Some("/r"))).unwrap();
    f.engine.create_container(request("b", Some("/r"))).unwrap();
    let scope = RootScope::Shared(SharedRoot::from("/r"));
    let held = RootLock::acquire(&f.engine.layout().root_lock_file(&scope.key())).unwrap();
    f.engine.install_package("a", "baz", None).unwrap_err();
    drop(held);

    let report = f.engine.reconcile(false).unwrap();
    assert_eq!(report.replayed_intents.len(), 1);
    assert!(f.engine.pending_intents().unwrap().is_empty());
    let a = f.engine.inspect("a").unwrap();
    assert_eq!(a.packages.len(), 1);
    assert_eq!(a.dependencies.len(), 2);

    // The replayed edges protect libx once b shares it.
    f.engine.install_package("b", "bar", None).unwrap();
    let removed = f.engine.uninstall_package("a", "baz").unwrap();
    assert_eq!(names(removed.orphaned), ["libz"]);
    assert!(f.engine.reconcile(false).unwrap().is_clean());
}

#[test]
fn reconcile_records_interrupted_uninstall() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", None)).unwrap();
    f.engine.install_package("a", "foo", None).unwrap();
    let journal = IntentJournal::new(f.engine.layout());
    journal
        .begin(IntentKind::UninstallPackage, "a", &["foo".to_owned()])
        .unwrap();

    let report = f.engine.reconcile(false).unwrap();
    assert_eq!(report.replayed_intents.len(), 1);
    assert_eq!(names(report.orphan_cleanup[0].removed.clone()), ["libx"]);
    let a = f.engine.inspect("a").unwrap();
    assert!(a.packages.is_empty());
    assert!(a.dependencies.is_empty());
    assert!(journal.list_incomplete().unwrap().is_empty());
}

#[test]
fn different_roots_proceed_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let containers = Arc::new(MockEngine::new());
    let packages = Arc::new(MockPackageManager::with_catalog(catalog()));
    // Create the schema once before the threads race to open it.
    drop(fixture_with(dir.path(), containers.clone(), packages.clone()));

    let barrier = Arc::new(Barrier::new(4));
    let mut handles = Vec::new();
    for i in 0..4 {
        let path = dir.path().to_path_buf();
        let b = Arc::clone(&barrier);
        let c = Arc::clone(&containers);
        let p = Arc::clone(&packages);
        handles.push(thread::spawn(move || {
            let f = fixture_with(&path, c, p);
            b.wait();
            let name = format!("box{i}");
            let root = format!("/roots/{i}");
            f.engine.create_container(request(&name, Some(&root))).unwrap();
            f.engine.install_package(&name, "foo", None).unwrap();
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let f = fixture_with(dir.path(), containers, packages);
    let listing = f.engine.list_containers(false).unwrap();
    assert_eq!(listing.len(), 4);
    let edges: usize = listing
        .iter()
        .map(|l| f.engine.inspect(&l.container.name).unwrap().dependencies.len())
        .sum();
    assert_eq!(edges, 4);
}

#[test]
fn list_includes_placeholders_only_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let f = fixture(dir.path());
    f.engine.create_container(request("a", Some("/r"))).unwrap();
    f.engine.create_container(request("b", Some("/r"))).unwrap();
    f.engine.create_container(request("c", None)).unwrap();
    f.engine.destroy_container("a", false).unwrap();

    let active = f.engine.list_containers(false).unwrap();
    assert_eq!(active.len(), 2);
    assert!(active.iter().all(|l| l.state == ContainerState::Active));

    let all = f.engine.list_containers(true).unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[2].state, ContainerState::Destroyed);

    let on_root = f
        .engine
        .filter_containers(&ContainerFilter::by_root(&SharedRoot::from("/r")), true)
        .unwrap();
    assert_eq!(on_root.len(), 2);
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let containers = Arc::new(MockEngine::new());
    let packages = Arc::new(MockPackageManager::with_catalog(catalog()));
    {
        let f = fixture_with(dir.path(), containers.clone(), packages.clone());
        f.engine.create_container(request("a", Some("/r"))).unwrap();
        f.engine.install_package("a", "foo", None).unwrap();
    }
    let f = fixture_with(dir.path(), containers, packages);
    let inspection = f.engine.inspect("a").unwrap();
    assert_eq!(inspection.packages.len(), 1);
    assert_eq!(inspection.dependencies.len(), 1);
    assert!(f.engine.pending_intents().unwrap().is_empty());
}
