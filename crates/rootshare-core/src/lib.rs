//! Bookkeeping core for rootshare.
//!
//! Containers sharing a root filesystem share its installed packages, so
//! removing a container or a package must never pull files out from under
//! another container. This crate keeps that promise:
//!
//! - [`RootTracker`] answers whether a root is still referenced;
//! - [`DependencyLedger`] records dependency edges and computes which
//!   dependencies became orphaned on a root;
//! - [`Reconciler`] drives the Active / Destroyed / Purged lifecycle;
//! - [`Engine`] is the command surface: it calls the external container engine
//!   and package manager outside any lock, then commits bookkeeping under a
//!   per-root [`RootLock`].

pub mod concurrency;
pub mod engine;
pub mod ledger;
pub mod lifecycle;
pub mod reconcile;
pub mod reconciler;
pub mod tracker;

pub use concurrency::{install_signal_handler, shutdown_requested, RootLock};
pub use engine::{
    ContainerListing, CreateRequest, CreateResult, DestroyResult, Engine, InstallResult,
    Inspection, OrphanCleanup, UninstallResult,
};
pub use ledger::{DependencyLedger, RecordSummary};
pub use lifecycle::{state_of, validate_transition, ContainerState};
pub use reconcile::ReconcileReport;
pub use reconciler::{
    DestroyOutcome, PurgeOutcome, Reconciler, RegisterOutcome, UninstallBookkeeping,
};
pub use tracker::RootTracker;

use rootshare_runtime::RuntimeError;
use rootshare_store::StoreError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] rootshare_schema::ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("external tool failed: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("another operation holds the lock for root {scope}; retry later")]
    RootLockContention { scope: String },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error classes reported to callers, one per recovery policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The edge is already recorded; callers treat it as a no-op.
    DuplicateEdge,
    UnknownContainer,
    /// Another mutation holds the root; the caller may retry.
    RootLockContention,
    /// The store must be migrated before anything else runs.
    SchemaVersionMismatch,
    /// The engine or package manager failed; no bookkeeping was committed.
    ExternalToolFailure,
    /// Bad names, unknown distributions and similar request errors.
    InvalidRequest,
    Internal,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Store(e) => match e {
                StoreError::DuplicateEdge { .. } => ErrorKind::DuplicateEdge,
                StoreError::UnknownContainer(_) => ErrorKind::UnknownContainer,
                StoreError::SchemaVersionMismatch { .. } => ErrorKind::SchemaVersionMismatch,
                StoreError::InvalidName(_)
                | StoreError::ContainerExists(_)
                | StoreError::InvalidFilter(_) => ErrorKind::InvalidRequest,
                _ => ErrorKind::Internal,
            },
            CoreError::Runtime(RuntimeError::Config(_)) | CoreError::Config(_) => {
                ErrorKind::InvalidRequest
            }
            CoreError::Runtime(_) => ErrorKind::ExternalToolFailure,
            CoreError::RootLockContention { .. } => ErrorKind::RootLockContention,
            CoreError::InvalidTransition { .. } | CoreError::Io(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_follow_taxonomy() {
        let dup = CoreError::Store(StoreError::DuplicateEdge {
            package: "foo".to_owned(),
            container: "a".to_owned(),
            dependency: "libx".to_owned(),
        });
        assert_eq!(dup.kind(), ErrorKind::DuplicateEdge);
        assert_eq!(
            CoreError::Store(StoreError::UnknownContainer("x".to_owned())).kind(),
            ErrorKind::UnknownContainer
        );
        assert_eq!(
            CoreError::RootLockContention {
                scope: "/r".to_owned()
            }
            .kind(),
            ErrorKind::RootLockContention
        );
        assert_eq!(
            CoreError::Store(StoreError::SchemaVersionMismatch {
                expected: "3".to_owned(),
                found: "1".to_owned()
            })
            .kind(),
            ErrorKind::SchemaVersionMismatch
        );
        assert_eq!(
            CoreError::Runtime(RuntimeError::ExecFailed("boom".to_owned())).kind(),
            ErrorKind::ExternalToolFailure
        );
        assert_eq!(
            CoreError::Config(rootshare_schema::ConfigError::UnknownDistribution(
                "gentoo".to_owned()
            ))
            .kind(),
            ErrorKind::InvalidRequest
        );
    }

    #[test]
    fn error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RootLockContention).unwrap();
        assert_eq!(json, "\"root_lock_contention\"");
    }
}
