use crate::engine::{ContainerEngine, ContainerSpec};
use crate::RuntimeError;
use std::process::{Command, Output, Stdio};
use tracing::{debug, info};

/// Directories of a shared root bind-mounted into every container using it.
const SHARED_ROOT_MOUNTS: &[&str] = &["usr", "etc", "var/lib", "opt"];

const LABEL_PREFIX: &str = "io.rootshare";

/// Docker or podman driven through its command line.
pub struct CliEngine {
    program: String,
}

impl CliEngine {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_owned(),
        }
    }

    fn run(&self, args: &[String]) -> Result<Output, RuntimeError> {
        debug!("{} {}", self.program, args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()?;
        Ok(output)
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.program, args.join(" "))
    }

    /// Arguments for `<engine> create`.
    pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec![
            "create".to_owned(),
            "--name".to_owned(),
            spec.name.clone(),
            "--hostname".to_owned(),
            spec.name.clone(),
            "--label".to_owned(),
            format!("{LABEL_PREFIX}.distribution={}", spec.distribution),
        ];
        if let Some(root) = &spec.shared_root {
            args.push("--label".to_owned());
            args.push(format!("{LABEL_PREFIX}.shared-root={root}"));
            for dir in SHARED_ROOT_MOUNTS {
                args.push("--volume".to_owned());
                args.push(format!("{}/{dir}:/{dir}", root.as_str().trim_end_matches('/')));
            }
        }
        args.push(spec.image.clone());
        args.extend(["sleep".to_owned(), "infinity".to_owned()]);
        args
    }
}

fn is_missing(stderr: &str) -> bool {
    let msg = stderr.to_lowercase();
    msg.contains("no such container") || msg.contains("no container with") || msg.contains("not found")
}

fn is_conflict(stderr: &str) -> bool {
    let msg = stderr.to_lowercase();
    msg.contains("already in use") || msg.contains("already exists")
}

impl ContainerEngine for CliEngine {
    fn name(&self) -> &str {
        &self.program
    }

    fn available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    fn create(&self, spec: &ContainerSpec) -> Result<(), RuntimeError> {
        let args = Self::create_args(spec);
        let output = self.run(&args)?;
        if !output.status.success() {
            if is_conflict(&String::from_utf8_lossy(&output.stderr)) {
                return Err(RuntimeError::ContainerExists(spec.name.clone()));
            }
            return Err(RuntimeError::command_failed(&self.describe(&args), &output));
        }

        let start = vec!["start".to_owned(), spec.name.clone()];
        let output = self.run(&start)?;
        if !output.status.success() {
            return Err(RuntimeError::command_failed(&self.describe(&start), &output));
        }
        info!("{} created container {}", self.program, spec.name);
        Ok(())
    }

    fn destroy(&self, spec: &ContainerSpec, force: bool) -> Result<(), RuntimeError> {
        if !force {
            let stop = vec!["stop".to_owned(), spec.name.clone()];
            let output = self.run(&stop)?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if is_missing(&stderr) {
                    return Err(RuntimeError::ContainerNotFound(spec.name.clone()));
                }
                return Err(RuntimeError::command_failed(&self.describe(&stop), &output));
            }
        }

        let mut rm = vec!["rm".to_owned()];
        if force {
            rm.push("--force".to_owned());
        }
        rm.push(spec.name.clone());
        let output = self.run(&rm)?;
        if !output.status.success() {
            if is_missing(&String::from_utf8_lossy(&output.stderr)) {
                return Err(RuntimeError::ContainerNotFound(spec.name.clone()));
            }
            return Err(RuntimeError::command_failed(&self.describe(&rm), &output));
        }
        info!("{} removed container {}", self.program, spec.name);
        Ok(())
    }

    fn exec(&self, spec: &ContainerSpec, command: &[String]) -> Result<Output, RuntimeError> {
        let mut args = vec!["exec".to_owned(), spec.name.clone()];
        args.extend_from_slice(command);
        let output = self.run(&args)?;
        if !output.status.success() && is_missing(&String::from_utf8_lossy(&output.stderr)) {
            return Err(RuntimeError::ContainerNotFound(spec.name.clone()));
        }
        Ok(output)
    }

    fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let output = self.run(&[
            "container".to_owned(),
            "inspect".to_owned(),
            "--format".to_owned(),
            "{{.Name}}".to_owned(),
            name.to_owned(),
        ])?;
        Ok(output.status.success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootshare_schema::SharedRoot;

    fn spec(root: Option<&str>) -> ContainerSpec {
        ContainerSpec {
            name: "dev".to_owned(),
            distribution: "arch".to_owned(),
            image: "docker.io/library/archlinux:latest".to_owned(),
            shared_root: root.map(SharedRoot::from),
            configuration: "{}".to_owned(),
        }
    }

    #[test]
    fn create_args_private_root() {
        let args = CliEngine::create_args(&spec(None));
        assert_eq!(args[0], "create");
        assert!(args.contains(&"io.rootshare.distribution=arch".to_owned()));
        assert!(!args.iter().any(|a| a == "--volume"));
        assert_eq!(
            &args[args.len() - 3..],
            &["docker.io/library/archlinux:latest", "sleep", "infinity"]
        );
    }

    #[test]
    fn create_args_mount_shared_root() {
        let args = CliEngine::create_args(&spec(Some("/srv/roots/arch/")));
        assert!(args.contains(&"io.rootshare.shared-root=/srv/roots/arch/".to_owned()));
        assert!(args.contains(&"/srv/roots/arch/usr:/usr".to_owned()));
        assert_eq!(
            args.iter().filter(|a| *a == "--volume").count(),
            SHARED_ROOT_MOUNTS.len()
        );
    }

    #[test]
    fn missing_and_conflict_detection() {
        assert!(is_missing("Error: No such container: dev"));
        assert!(is_missing("Error: no container with name or ID \"dev\" found"));
        assert!(is_conflict("the container name \"/dev\" is already in use"));
        assert!(!is_conflict("permission denied"));
    }

    #[test]
    fn engine_name_is_program() {
        assert_eq!(CliEngine::new("podman").name(), "podman");
    }
}
