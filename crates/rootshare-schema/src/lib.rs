//! Shared vocabulary for rootshare.
//!
//! This crate defines the schema layer: identifier newtypes (`ContainerName`,
//! `SharedRoot`, `PackageName`, `Distribution`), the closed `DepType`
//! enumeration used by dependency bookkeeping, the TOML `Settings` file, and
//! the built-in per-distribution package-manager presets.

pub mod config;
pub mod deps;
pub mod distro;
pub mod types;

pub use config::{ConfigError, Settings};
pub use deps::{optional_package_type, DepType, ReportedDependency, UnknownDepType};
pub use distro::{get_distro, list_distros, DistroCommands, DistroPreset, BUILTIN_DISTROS};
pub use types::{ContainerName, Distribution, PackageName, SharedRoot};
