use crate::RuntimeError;
use rootshare_schema::SharedRoot;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Everything an engine or package manager needs to address one container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub distribution: String,
    pub image: String,
    pub shared_root: Option<SharedRoot>,
    /// Opaque configuration blob recorded for the container.
    pub configuration: String,
}

pub trait ContainerEngine: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// Create and start the container. Fails with
    /// [`RuntimeError::ContainerExists`] when the name is taken.
    fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError>;

    /// Stop and remove the container. Fails with
    /// [`RuntimeError::ContainerNotFound`] when there is nothing to remove.
    fn destroy(&self, spec: &ContainerSpec, force: bool) -> Result<(), RuntimeError>;

    fn exec(
        &self,
        spec: &ContainerSpec,
        _command: &[String],
    ) -> Result<std::process::Output, RuntimeError> {
        Err(RuntimeError::ExecFailed(format!(
            "exec of {} not supported by {} engine",
            spec.name,
            self.name()
        )))
    }

    fn exists(&self, name: &str) -> Result<bool, RuntimeError>;
}

/// Pick an engine by name. `state_dir` backs the mock engine, which keeps its
/// containers in a file so separate CLI invocations see the same state.
pub fn select_engine(
    name: &str,
    state_dir: &Path,
) -> Result<Arc<dyn ContainerEngine>, RuntimeError> {
    match name {
        "docker" | "podman" => Ok(Arc::new(crate::podman::CliEngine::new(name))),
        "mock" => Ok(Arc::new(crate::mock::MockEngine::persistent(
            state_dir.join("mock-engine.json"),
        ))),
        other => Err(RuntimeError::EngineUnavailable(other.to_owned())),
    }
}
