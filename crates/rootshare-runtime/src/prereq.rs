use std::fmt;
use std::process::Command;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: &'static str,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Check what the selected engine needs on the host. An empty list means
/// everything is in place; the mock engine needs nothing.
pub fn check_engine_prereqs(engine: &str) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();
    match engine {
        "podman" => {
            if !command_exists("podman") {
                missing.push(MissingPrereq {
                    name: "podman",
                    purpose: "running containers",
                    install_hint: "apt install podman | dnf install podman | pacman -S podman",
                });
            }
        }
        "docker" => {
            if !command_exists("docker") {
                missing.push(MissingPrereq {
                    name: "docker",
                    purpose: "running containers",
                    install_hint: "apt install docker.io | dnf install moby-engine | pacman -S docker",
                });
            }
        }
        _ => {}
    }
    if engine != "mock" && !command_exists("sh") {
        missing.push(MissingPrereq {
            name: "sh",
            purpose: "running package-manager command templates",
            install_hint: "any POSIX shell (usually pre-installed)",
        });
    }
    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nrootshare needs a container engine to create containers.");
    msg
}
