use criterion::{criterion_group, criterion_main, Criterion};
use rootshare_core::{DependencyLedger, Reconciler};
use rootshare_schema::{DepType, SharedRoot};
use rootshare_store::{ContainerRecord, RootScope, Store, StoreError};

const CONTAINERS: usize = 20;
const PACKAGES: usize = 10;
const DEPS_PER_PACKAGE: usize = 8;

/// Store with `CONTAINERS` containers on one root, each with `PACKAGES`
/// packages pulling `DEPS_PER_PACKAGE` dependencies from a shared pool.
fn populated_store() -> Store {
    let store = Store::open_in_memory().unwrap();
    store
        .transaction(|tx| {
            let ledger = DependencyLedger::new(tx);
            for c in 0..CONTAINERS {
                let name = format!("box{c}");
                tx.upsert_container(&ContainerRecord::new(
                    name.as_str(),
                    "arch",
                    Some(SharedRoot::from("/roots/bench")),
                    "{}",
                ))?;
                for p in 0..PACKAGES {
                    for d in 0..DEPS_PER_PACKAGE {
                        ledger.record_dependency(
                            &name,
                            &format!("pkg{p}"),
                            &format!("lib{}", (c + p + d) % 40),
                            DepType::Required,
                        )?;
                    }
                }
            }
            Ok::<_, StoreError>(())
        })
        .unwrap();
    store
}

fn bench_remove_package(c: &mut Criterion) {
    let scope = RootScope::Shared(SharedRoot::from("/roots/bench"));
    c.bench_function("ledger_remove_package_shared_root", |b| {
        b.iter_with_setup(populated_store, |store| {
            store
                .transaction(|tx| DependencyLedger::new(tx).remove_package(&scope, "box0", "pkg0"))
                .unwrap();
        });
    });
}

fn bench_destroy_last_container(c: &mut Criterion) {
    c.bench_function("reconciler_destroy_all_on_root", |b| {
        b.iter_with_setup(populated_store, |store| {
            for i in 0..CONTAINERS {
                store
                    .transaction(|tx| Reconciler::new(tx).destroy(&format!("box{i}")))
                    .unwrap();
            }
        });
    });
}

criterion_group!(benches, bench_remove_package, bench_destroy_last_container);
criterion_main!(benches);
