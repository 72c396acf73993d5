use crate::distro::{get_distro, DistroCommands};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeToml(#[from] toml::ser::Error),
    #[error("unknown distribution '{0}' (no built-in preset and no [distributions.{0}] table)")]
    UnknownDistribution(String),
    #[error("distribution '{distribution}': command '{field}' must not be empty")]
    EmptyCommand {
        distribution: String,
        field: &'static str,
    },
    #[error("HOME is not set")]
    HomeNotSet,
}

/// User settings, read from `~/.config/rootshare/config.toml`.
///
/// ```toml
/// data_dir = "~/.local/share/rootshare"
/// engine = "podman"
///
/// [distributions.arch]
/// image = "docker.io/library/archlinux:latest"
/// install = "paru -S --noconfirm"
/// uninstall = "paru -Rs --noconfirm"
/// dependencies = "/usr/local/lib/rootshare/pacman-deps.sh"
/// required_by = "/usr/local/lib/rootshare/pacman-required-by.sh"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default)]
    pub distributions: BTreeMap<String, DistroCommands>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            engine: default_engine(),
            distributions: BTreeMap::new(),
        }
    }
}

fn default_data_dir() -> String {
    "~/.local/share/rootshare".to_owned()
}

fn default_engine() -> String {
    "podman".to_owned()
}

impl Settings {
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(input)?;
        for (name, commands) in &settings.distributions {
            commands.validate(name)?;
        }
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load the default config file; a missing file yields default settings.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = default_config_path()?;
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Package-manager commands for a distribution. Entries in the settings
    /// file take priority over the built-in presets.
    pub fn distribution(&self, name: &str) -> Result<DistroCommands, ConfigError> {
        if let Some(commands) = self.distributions.get(name) {
            return Ok(commands.clone());
        }
        get_distro(name)
            .ok_or_else(|| ConfigError::UnknownDistribution(name.to_owned()))?
            .commands()
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = std::env::var("HOME").map_err(|_| ConfigError::HomeNotSet)?;
    Ok(PathBuf::from(home).join(".config/rootshare/config.toml"))
}
