use crate::config::ConfigError;
use serde::{Deserialize, Serialize};

/// Container image and package-manager command templates for one distribution.
///
/// Each command is run inside a container as `<command> <package>` through
/// `/bin/sh -c`. `dependencies` must print one `DEP: <name>::::<type>` line per
/// dependency the package would newly pull in; `required_by` must exit 0 when
/// another installed package still requires the given one.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DistroCommands {
    pub image: String,
    pub install: String,
    pub uninstall: String,
    pub dependencies: String,
    pub required_by: String,
}

impl DistroCommands {
    pub fn validate(&self, distribution: &str) -> Result<(), ConfigError> {
        for (field, value) in [
            ("image", &self.image),
            ("install", &self.install),
            ("uninstall", &self.uninstall),
            ("dependencies", &self.dependencies),
            ("required_by", &self.required_by),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyCommand {
                    distribution: distribution.to_owned(),
                    field,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DistroPreset {
    pub name: &'static str,
    pub description: &'static str,
    pub commands: &'static str,
}

impl DistroPreset {
    pub fn commands(&self) -> Result<DistroCommands, ConfigError> {
        let commands: DistroCommands = toml::from_str(self.commands)?;
        commands.validate(self.name)?;
        Ok(commands)
    }
}

pub const BUILTIN_DISTROS: &[DistroPreset] = &[
    DistroPreset {
        name: "arch",
        description: "Arch Linux (pacman)",
        commands: r#"image = "docker.io/library/archlinux:latest"
install = "pacman -S --noconfirm --needed"
uninstall = "pacman -Rs --noconfirm"
dependencies = "/usr/local/lib/rootshare/pacman-deps.sh"
required_by = "/usr/local/lib/rootshare/pacman-required-by.sh"
"#,
    },
    DistroPreset {
        name: "ubuntu",
        description: "Ubuntu (apt)",
        commands: r#"image = "docker.io/library/ubuntu:24.04"
install = "apt-get install -y --no-install-recommends"
uninstall = "apt-get purge -y"
dependencies = "/usr/local/lib/rootshare/apt-deps.sh"
required_by = "/usr/local/lib/rootshare/apt-required-by.sh"
"#,
    },
    DistroPreset {
        name: "debian",
        description: "Debian (apt)",
        commands: r#"image = "docker.io/library/debian:bookworm"
install = "apt-get install -y --no-install-recommends"
uninstall = "apt-get purge -y"
dependencies = "/usr/local/lib/rootshare/apt-deps.sh"
required_by = "/usr/local/lib/rootshare/apt-required-by.sh"
"#,
    },
    DistroPreset {
        name: "fedora",
        description: "Fedora (dnf)",
        commands: r#"image = "registry.fedoraproject.org/fedora:latest"
install = "dnf install -y"
uninstall = "dnf remove -y"
dependencies = "/usr/local/lib/rootshare/dnf-deps.sh"
required_by = "/usr/local/lib/rootshare/dnf-required-by.sh"
"#,
    },
];

pub fn get_distro(name: &str) -> Option<&'static DistroPreset> {
    BUILTIN_DISTROS.iter().find(|p| p.name == name)
}

pub fn list_distros() -> &'static [DistroPreset] {
    BUILTIN_DISTROS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_presets_parse() {
        for preset in BUILTIN_DISTROS {
            let commands = preset.commands();
            assert!(commands.is_ok(), "preset '{}' failed: {:?}", preset.name, commands.err());
        }
    }

    #[test]
    fn get_distro_works() {
        assert!(get_distro("arch").is_some());
        assert!(get_distro("fedora").is_some());
        assert!(get_distro("nonexistent").is_none());
    }

    #[test]
    fn list_distros_returns_all() {
        assert_eq!(list_distros().len(), BUILTIN_DISTROS.len());
    }

    #[test]
    fn validate_rejects_blank_command() {
        let commands = DistroCommands {
            image: "fedora".to_owned(),
            install: "dnf install -y".to_owned(),
            uninstall: "  ".to_owned(),
            dependencies: "deps".to_owned(),
            required_by: "req".to_owned(),
        };
        let err = commands.validate("fedora").unwrap_err();
        assert!(err.to_string().contains("uninstall"));
    }
}
