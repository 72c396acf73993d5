//! Persistent bookkeeping store for rootshare.
//!
//! This crate provides the storage layer: a SQLite-backed [`Store`] holding the
//! schema version singleton, active containers, destroyed-but-referenced
//! container placeholders, package dependency edges and explicitly installed
//! packages. Every mutation runs inside [`Store::transaction`], so a failure at
//! any point rolls the whole operation back. [`StoreLayout`] manages the data
//! directory, [`IntentJournal`] records external calls whose bookkeeping has not
//! been committed yet, and [`verify_store_integrity`] checks cross-table
//! invariants.

pub mod containers;
pub mod db;
pub mod dependencies;
pub mod integrity;
pub mod journal;
pub mod layout;
pub mod migration;
pub mod packages;
pub mod schema;

pub use containers::{validate_container_name, ContainerFilter, ContainerRecord, RootScope};
pub use db::{Store, StoreTx};
pub use dependencies::DependencyEdge;
pub use integrity::{verify_store_integrity, IntegrityFailure, IntegrityReport};
pub use journal::{InstallOutcome, Intent, IntentJournal, IntentKind};
pub use layout::StoreLayout;
pub use migration::{compare_versions, latest_version, Migration, MigrationResult};
pub use packages::{PackageFilter, PackageRecord};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory to ensure that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("dependency edge already recorded: {package} -> {dependency} in container '{container}'")]
    DuplicateEdge {
        package: String,
        container: String,
        dependency: String,
    },
    #[error("unknown container: {0}")]
    UnknownContainer(String),
    #[error("container '{0}' already exists")]
    ContainerExists(String),
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch { expected: String, found: String },
    #[error("invalid container name: {0}")]
    InvalidName(String),
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow { table: &'static str, reason: String },
    #[error("invalid package filter: {0}")]
    InvalidFilter(#[from] regex::Error),
}
