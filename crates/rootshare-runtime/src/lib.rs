//! External collaborators for rootshare: container engines and per-distribution
//! package managers.
//!
//! The bookkeeping core never launches containers or resolves packages itself.
//! It drives a [`ContainerEngine`] (docker or podman through their CLIs, or an
//! in-process mock) and a [`PackageManager`] (distribution command templates run
//! inside a container, or a catalog-driven mock), and decides from their
//! results what to record.

pub mod engine;
pub mod mock;
pub mod package;
pub mod podman;
pub mod prereq;

pub use engine::{select_engine, ContainerEngine, ContainerSpec};
pub use mock::{MockCatalog, MockEngine, MockPackageManager};
pub use package::{parse_dependency_report, select_package_manager, DistroPackageManager, PackageManager};
pub use podman::CliEngine;
pub use prereq::{check_engine_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("container engine '{0}' is not available on this system")]
    EngineUnavailable(String),
    #[error("container '{0}' does not exist in the container engine")]
    ContainerNotFound(String),
    #[error("container '{0}' already exists in the container engine")]
    ContainerExists(String),
    #[error("command `{command}` failed with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
    #[error("invalid package-manager output: {0}")]
    InvalidOutput(String),
    #[error("distribution configuration error: {0}")]
    Config(#[from] rootshare_schema::ConfigError),
}

impl RuntimeError {
    pub(crate) fn command_failed(command: &str, output: &std::process::Output) -> Self {
        RuntimeError::CommandFailed {
            command: command.to_owned(),
            status: output
                .status
                .code()
                .map_or_else(|| "signal".to_owned(), |c| format!("exit code {c}")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
        }
    }
}

/// Quote `arg` for `/bin/sh`.
pub(crate) fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"-_.+:/=@".contains(&b))
    {
        return arg.to_owned();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}
