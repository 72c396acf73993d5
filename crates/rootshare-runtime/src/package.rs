use crate::engine::{ContainerEngine, ContainerSpec};
use crate::{shell_quote, RuntimeError};
use rootshare_schema::{DepType, DistroCommands, ReportedDependency, Settings};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Marker of a dependency line in the output of a distribution's
/// `dependencies` command: `DEP: <name>::::<type>`.
const DEP_PREFIX: &str = "DEP: ";
const DEP_SEPARATOR: &str = "::::";

/// A distribution package manager, addressed through a container that uses
/// the root being modified.
pub trait PackageManager: Send + Sync {
    /// Install `package` into the container's root. Returns the extra
    /// dependencies installed on its behalf; dependencies the package manager
    /// already tracks by itself are not reported.
    fn install(
        &self,
        spec: &ContainerSpec,
        package: &str,
    ) -> Result<Vec<ReportedDependency>, RuntimeError>;

    /// Remove `packages` from the container's root.
    fn uninstall(&self, spec: &ContainerSpec, packages: &[String]) -> Result<(), RuntimeError>;

    /// Whether another installed package on the root still requires `package`
    /// directly, outside any recorded edge.
    fn is_required_by_others(&self, spec: &ContainerSpec, package: &str)
        -> Result<bool, RuntimeError>;
}

/// Parse `DEP: <name>::::<type>` lines reported for `package`. Other lines
/// are ignored; a malformed dependency line is an error.
pub fn parse_dependency_report(
    package: &str,
    output: &str,
) -> Result<Vec<ReportedDependency>, RuntimeError> {
    let mut deps = Vec::new();
    for line in output.lines() {
        let Some(rest) = line.trim().strip_prefix(DEP_PREFIX) else {
            continue;
        };
        let (name, dep_type) = rest.split_once(DEP_SEPARATOR).ok_or_else(|| {
            RuntimeError::InvalidOutput(format!("malformed dependency line: {line}"))
        })?;
        let name = name.trim();
        if name.is_empty() || name == package {
            continue;
        }
        let dep_type: DepType = dep_type
            .trim()
            .parse()
            .map_err(|e| RuntimeError::InvalidOutput(format!("{e}")))?;
        let dep = ReportedDependency::new(package, name, dep_type);
        if !deps.contains(&dep) {
            deps.push(dep);
        }
    }
    Ok(deps)
}

/// Package manager driven by the command templates of a distribution,
/// executed inside the container through the engine.
pub struct DistroPackageManager {
    engine: Arc<dyn ContainerEngine>,
    settings: Settings,
}

impl DistroPackageManager {
    pub fn new(engine: Arc<dyn ContainerEngine>, settings: Settings) -> Self {
        Self { engine, settings }
    }

    fn commands(&self, spec: &ContainerSpec) -> Result<DistroCommands, RuntimeError> {
        Ok(self.settings.distribution(&spec.distribution)?)
    }

    fn sh(
        &self,
        spec: &ContainerSpec,
        template: &str,
        args: &[String],
    ) -> Result<(String, std::process::Output), RuntimeError> {
        let mut script = template.to_owned();
        for arg in args {
            script.push(' ');
            script.push_str(&shell_quote(arg));
        }
        let argv = vec!["/bin/sh".to_owned(), "-c".to_owned(), script.clone()];
        let output = self.engine.exec(spec, &argv)?;
        Ok((script, output))
    }
}

impl PackageManager for DistroPackageManager {
    fn install(
        &self,
        spec: &ContainerSpec,
        package: &str,
    ) -> Result<Vec<ReportedDependency>, RuntimeError> {
        let commands = self.commands(spec)?;

        let (script, report) = self.sh(spec, &commands.dependencies, &[package.to_owned()])?;
        if !report.status.success() {
            return Err(RuntimeError::command_failed(&script, &report));
        }
        let deps = parse_dependency_report(package, &String::from_utf8_lossy(&report.stdout))?;
        debug!("{package} brings {} extra dependencies in {}", deps.len(), spec.name);

        let mut targets = vec![package.to_owned()];
        targets.extend(deps.iter().map(|d| d.dependency.to_string()));
        let (script, output) = self.sh(spec, &commands.install, &targets)?;
        if !output.status.success() {
            return Err(RuntimeError::command_failed(&script, &output));
        }
        info!("installed {package} in {}", spec.name);
        Ok(deps)
    }

    fn uninstall(&self, spec: &ContainerSpec, packages: &[String]) -> Result<(), RuntimeError> {
        if packages.is_empty() {
            return Ok(());
        }
        let commands = self.commands(spec)?;
        let (script, output) = self.sh(spec, &commands.uninstall, packages)?;
        if !output.status.success() {
            return Err(RuntimeError::command_failed(&script, &output));
        }
        info!("uninstalled {} from {}", packages.join(" "), spec.name);
        Ok(())
    }

    fn is_required_by_others(
        &self,
        spec: &ContainerSpec,
        package: &str,
    ) -> Result<bool, RuntimeError> {
        let commands = self.commands(spec)?;
        let (script, output) = self.sh(spec, &commands.required_by, &[package.to_owned()])?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => {
                warn!("required-by check for {package} failed in {}", spec.name);
                Err(RuntimeError::command_failed(&script, &output))
            }
        }
    }
}

/// Package manager matching an engine chosen by [`crate::select_engine`].
/// The mock engine pairs with the mock package manager, whose catalog is
/// read from `<state_dir>/mock-catalog.toml` when present.
pub fn select_package_manager(
    engine: Arc<dyn ContainerEngine>,
    settings: &Settings,
    state_dir: &Path,
) -> Result<Arc<dyn PackageManager>, RuntimeError> {
    if engine.name() == "mock" {
        let catalog = crate::mock::MockCatalog::load_or_default(&state_dir.join("mock-catalog.toml"))?;
        return Ok(Arc::new(crate::mock::MockPackageManager::with_catalog(catalog)));
    }
    Ok(Arc::new(DistroPackageManager::new(engine, settings.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_report_reads_dep_lines() {
        let out = "\
resolving dependencies...
DEP: libx::::required
DEP: python-pytest::::optional
  DEP: docs-extra::::suggestion
noise line
";
        let deps = parse_dependency_report("foo", out).unwrap();
        assert_eq!(deps.len(), 3);
        assert_eq!(deps[0], ReportedDependency::new("foo", "libx", DepType::Required));
        assert_eq!(deps[1].dep_type, DepType::Optional);
        assert_eq!(deps[2].dependency, "docs-extra");
    }

    #[test]
    fn parse_report_skips_self_and_duplicates() {
        let out = "DEP: foo::::required\nDEP: libx::::required\nDEP: libx::::required\n";
        let deps = parse_dependency_report("foo", out).unwrap();
        assert_eq!(deps.len(), 1);
    }

    #[test]
    fn parse_report_rejects_malformed_lines() {
        assert!(matches!(
            parse_dependency_report("foo", "DEP: libx required"),
            Err(RuntimeError::InvalidOutput(_))
        ));
        assert!(matches!(
            parse_dependency_report("foo", "DEP: libx::::recommended"),
            Err(RuntimeError::InvalidOutput(_))
        ));
    }

    #[test]
    fn select_mock_package_manager() {
        let dir = tempfile::tempdir().unwrap();
        let engine = crate::select_engine("mock", dir.path()).unwrap();
        let pm = select_package_manager(engine, &Settings::default(), dir.path()).unwrap();
        let spec = ContainerSpec {
            name: "a".to_owned(),
            distribution: "arch".to_owned(),
            image: "arch".to_owned(),
            shared_root: None,
            configuration: "{}".to_owned(),
        };
        assert!(pm.install(&spec, "anything").unwrap().is_empty());
    }
}
