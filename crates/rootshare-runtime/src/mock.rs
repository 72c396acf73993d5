use crate::engine::{ContainerEngine, ContainerSpec};
use crate::package::PackageManager;
use crate::RuntimeError;
use rootshare_schema::{DepType, ReportedDependency};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

fn poisoned<E: std::fmt::Display>(e: E) -> RuntimeError {
    RuntimeError::ExecFailed(format!("mutex poisoned: {e}"))
}

/// In-process container engine. Optionally persists its container table to a
/// JSON file so consecutive processes share it.
pub struct MockEngine {
    state: Mutex<BTreeMap<String, ContainerSpec>>,
    path: Option<PathBuf>,
    fail_create: Mutex<bool>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self {
            state: Mutex::new(BTreeMap::new()),
            path: None,
            fail_create: Mutex::new(false),
        }
    }
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persistent(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            ..Self::default()
        }
    }

    fn load(&self) -> Result<BTreeMap<String, ContainerSpec>, RuntimeError> {
        match &self.path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                serde_json::from_str(&content)
                    .map_err(|e| RuntimeError::ExecFailed(format!("corrupt mock state: {e}")))
            }
            Some(_) => Ok(BTreeMap::new()),
            None => Ok(self.state.lock().map_err(poisoned)?.clone()),
        }
    }

    fn save(&self, containers: BTreeMap<String, ContainerSpec>) -> Result<(), RuntimeError> {
        if let Some(path) = &self.path {
            let dir = path.parent().unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir)?;
            let content = serde_json::to_string_pretty(&containers)
                .map_err(|e| RuntimeError::ExecFailed(e.to_string()))?;
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(content.as_bytes())?;
            tmp.persist(path).map_err(|e| RuntimeError::Io(e.error))?;
        }
        *self.state.lock().map_err(poisoned)? = containers;
        Ok(())
    }

    /// Make the next `create` fail, as if the engine rejected the image.
    pub fn fail_next_create(&self) {
        if let Ok(mut flag) = self.fail_create.lock() {
            *flag = true;
        }
    }

    /// Drop a container behind the store's back, as a user running
    /// `podman rm` by hand would.
    pub fn remove_externally(&self, name: &str) -> Result<(), RuntimeError> {
        let mut containers = self.load()?;
        containers.remove(name);
        self.save(containers)
    }

    pub fn containers(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(self.load()?.into_keys().collect())
    }
}

impl ContainerEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        {
            let mut fail = self.fail_create.lock().map_err(poisoned)?;
            if *fail {
                *fail = false;
                return Err(RuntimeError::ExecFailed(format!(
                    "mock engine refused to create {}",
                    spec.name
                )));
            }
        }
        let mut containers = self.load()?;
        if containers.contains_key(&spec.name) {
            return Err(RuntimeError::ContainerExists(spec.name.clone()));
        }
        containers.insert(spec.name.clone(), spec.clone());
        self.save(containers)
    }

    fn destroy(&self, spec: &ContainerSpec, _force: bool) -> Result<(), RuntimeError> {
        let mut containers = self.load()?;
        if containers.remove(&spec.name).is_none() {
            return Err(RuntimeError::ContainerNotFound(spec.name.clone()));
        }
        self.save(containers)
    }

    fn exec(
        &self,
        spec: &ContainerSpec,
        command: &[String],
    ) -> Result<std::process::Output, RuntimeError> {
        use std::os::unix::process::ExitStatusExt;
        if !self.load()?.contains_key(&spec.name) {
            return Err(RuntimeError::ContainerNotFound(spec.name.clone()));
        }
        Ok(std::process::Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: format!("mock-exec: {}\n", command.join(" ")).into_bytes(),
            stderr: Vec::new(),
        })
    }

    fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.load()?.contains_key(name))
    }
}

/// Extra dependencies the mock package manager reports for one package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockPackage {
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub optional: Vec<String>,
    #[serde(default)]
    pub suggestion: Vec<String>,
}

/// Scripted behavior of [`MockPackageManager`].
///
/// ```toml
/// held = ["glibc"]        # still required by other packages on the root
/// broken = ["nope"]       # installing or removing these fails
///
/// [packages.foo]
/// required = ["libx"]
/// optional = ["foo-docs"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockCatalog {
    #[serde(default)]
    pub held: BTreeSet<String>,
    #[serde(default)]
    pub broken: BTreeSet<String>,
    #[serde(default)]
    pub packages: BTreeMap<String, MockPackage>,
}

impl MockCatalog {
    pub fn load_or_default(path: &Path) -> Result<Self, RuntimeError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| RuntimeError::InvalidOutput(format!("mock catalog {}: {e}", path.display())))
    }

    pub fn with_package(mut self, name: &str, required: &[&str]) -> Self {
        self.packages.insert(
            name.to_owned(),
            MockPackage {
                required: required.iter().map(|s| (*s).to_owned()).collect(),
                ..MockPackage::default()
            },
        );
        self
    }

    fn dependencies_of(&self, package: &str) -> Vec<ReportedDependency> {
        let Some(entry) = self.packages.get(package) else {
            return Vec::new();
        };
        let mut deps = Vec::new();
        for (names, dep_type) in [
            (&entry.required, DepType::Required),
            (&entry.optional, DepType::Optional),
            (&entry.suggestion, DepType::Suggestion),
        ] {
            deps.extend(
                names
                    .iter()
                    .map(|dep| ReportedDependency::new(package, dep.as_str(), dep_type)),
            );
        }
        deps
    }
}

fn root_key(spec: &ContainerSpec) -> String {
    spec.shared_root
        .as_ref()
        .map_or_else(|| format!("private:{}", spec.name), |r| format!("root:{r}"))
}

/// Catalog-driven package manager that records what it was asked to do.
#[derive(Default)]
pub struct MockPackageManager {
    catalog: Mutex<MockCatalog>,
    installed: Mutex<BTreeMap<String, BTreeSet<String>>>,
    uninstalled: Mutex<Vec<String>>,
}

impl MockPackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(catalog: MockCatalog) -> Self {
        Self {
            catalog: Mutex::new(catalog),
            ..Self::default()
        }
    }

    /// Report `package` as directly required by something else on every root.
    pub fn hold(&self, package: &str) {
        if let Ok(mut catalog) = self.catalog.lock() {
            catalog.held.insert(package.to_owned());
        }
    }

    pub fn release(&self, package: &str) {
        if let Ok(mut catalog) = self.catalog.lock() {
            catalog.held.remove(package);
        }
    }

    /// Make installing or removing `package` fail.
    pub fn break_package(&self, package: &str) {
        if let Ok(mut catalog) = self.catalog.lock() {
            catalog.broken.insert(package.to_owned());
        }
    }

    /// Every package removed so far, in call order.
    pub fn uninstalled(&self) -> Vec<String> {
        self.uninstalled.lock().map(|u| u.clone()).unwrap_or_default()
    }

    /// Packages currently present on the root (or private root) of `spec`.
    pub fn installed_on(&self, spec: &ContainerSpec) -> BTreeSet<String> {
        self.installed
            .lock()
            .ok()
            .and_then(|i| i.get(&root_key(spec)).cloned())
            .unwrap_or_default()
    }
}

impl PackageManager for MockPackageManager {
    fn install(
        &self,
        spec: &ContainerSpec,
        package: &str,
    ) -> Result<Vec<ReportedDependency>, RuntimeError> {
        let catalog = self.catalog.lock().map_err(poisoned)?;
        if catalog.broken.contains(package) {
            return Err(RuntimeError::ExecFailed(format!(
                "mock install of {package} failed in {}",
                spec.name
            )));
        }
        let deps = catalog.dependencies_of(package);
        let mut installed = self.installed.lock().map_err(poisoned)?;
        let on_root = installed.entry(root_key(spec)).or_default();
        on_root.insert(package.to_owned());
        on_root.extend(deps.iter().map(|d| d.dependency.to_string()));
        Ok(deps)
    }

    fn uninstall(&self, spec: &ContainerSpec, packages: &[String]) -> Result<(), RuntimeError> {
        let catalog = self.catalog.lock().map_err(poisoned)?;
        if let Some(broken) = packages.iter().find(|p| catalog.broken.contains(*p)) {
            return Err(RuntimeError::ExecFailed(format!(
                "mock uninstall of {broken} failed in {}",
                spec.name
            )));
        }
        let mut installed = self.installed.lock().map_err(poisoned)?;
        if let Some(on_root) = installed.get_mut(&root_key(spec)) {
            for package in packages {
                on_root.remove(package);
            }
        }
        self.uninstalled
            .lock()
            .map_err(poisoned)?
            .extend(packages.iter().cloned());
        Ok(())
    }

    fn is_required_by_others(
        &self,
        _spec: &ContainerSpec,
        package: &str,
    ) -> Result<bool, RuntimeError> {
        Ok(self.catalog.lock().map_err(poisoned)?.held.contains(package))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootshare_schema::SharedRoot;

    fn spec(name: &str, root: Option<&str>) -> ContainerSpec {
        ContainerSpec {
            name: name.to_owned(),
            distribution: "arch".to_owned(),
            image: "archlinux".to_owned(),
            shared_root: root.map(SharedRoot::from),
            configuration: "{}".to_owned(),
        }
    }

    #[test]
    fn mock_engine_lifecycle() {
        let engine = MockEngine::new();
        let s = spec("a", None);
        engine.create(&s).unwrap();
        assert!(engine.exists("a").unwrap());
        assert!(matches!(engine.create(&s), Err(RuntimeError::ContainerExists(_))));

        let out = engine.exec(&s, &["echo".to_owned(), "hi".to_owned()]).unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.stdout), "mock-exec: echo hi\n");

        engine.destroy(&s, false).unwrap();
        assert!(!engine.exists("a").unwrap());
        assert!(matches!(
            engine.destroy(&s, true),
            Err(RuntimeError::ContainerNotFound(_))
        ));
    }

    #[test]
    fn mock_engine_fail_next_create() {
        let engine = MockEngine::new();
        engine.fail_next_create();
        assert!(engine.create(&spec("a", None)).is_err());
        engine.create(&spec("a", None)).unwrap();
    }

    #[test]
    fn persistent_engine_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mock-engine.json");
        MockEngine::persistent(path.clone())
            .create(&spec("a", Some("/r")))
            .unwrap();
        let reopened = MockEngine::persistent(path);
        assert_eq!(reopened.containers().unwrap(), vec!["a".to_owned()]);
        reopened.remove_externally("a").unwrap();
        assert!(!reopened.exists("a").unwrap());
    }

    #[test]
    fn mock_pm_reports_catalog_dependencies() {
        let pm = MockPackageManager::with_catalog(MockCatalog::default().with_package("foo", &["libx"]));
        let s = spec("a", Some("/r"));
        let deps = pm.install(&s, "foo").unwrap();
        assert_eq!(deps, vec![ReportedDependency::new("foo", "libx", DepType::Required)]);
        assert!(pm.installed_on(&s).contains("libx"));

        pm.uninstall(&s, &["foo".to_owned(), "libx".to_owned()]).unwrap();
        assert!(pm.installed_on(&s).is_empty());
        assert_eq!(pm.uninstalled(), vec!["foo".to_owned(), "libx".to_owned()]);
    }

    #[test]
    fn mock_pm_hold_and_break() {
        let pm = MockPackageManager::new();
        let s = spec("a", None);
        assert!(!pm.is_required_by_others(&s, "glibc").unwrap());
        pm.hold("glibc");
        assert!(pm.is_required_by_others(&s, "glibc").unwrap());
        pm.release("glibc");
        assert!(!pm.is_required_by_others(&s, "glibc").unwrap());

        pm.break_package("nope");
        assert!(pm.install(&s, "nope").is_err());
        assert!(pm.uninstall(&s, &["nope".to_owned()]).is_err());
    }

    #[test]
    fn catalog_parses_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mock-catalog.toml");
        std::fs::write(
            &path,
            r#"
held = ["glibc"]

[packages.foo]
required = ["libx"]
optional = ["foo-docs"]
"#,
        )
        .unwrap();
        let catalog = MockCatalog::load_or_default(&path).unwrap();
        assert!(catalog.held.contains("glibc"));
        let deps = catalog.dependencies_of("foo");
        assert_eq!(deps.len(), 2);
        assert_eq!(deps[1].dep_type, DepType::Optional);

        let missing = MockCatalog::load_or_default(&dir.path().join("none.toml")).unwrap();
        assert_eq!(missing, MockCatalog::default());
    }
}
