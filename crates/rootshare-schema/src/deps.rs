use crate::types::PackageName;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How a dependency was pulled in by the package that required it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepType {
    Required,
    Optional,
    Suggestion,
}

impl DepType {
    pub const ALL: [DepType; 3] = [DepType::Required, DepType::Optional, DepType::Suggestion];

    /// Column value stored in `package_deps.dep_type`.
    pub fn as_str(self) -> &'static str {
        match self {
            DepType::Required => "required",
            DepType::Optional => "optional",
            DepType::Suggestion => "suggestion",
        }
    }
}

impl fmt::Display for DepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown dependency type '{0}', expected one of: required, optional, suggestion")]
pub struct UnknownDepType(pub String);

impl FromStr for DepType {
    type Err = UnknownDepType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "required" | "Required" => Ok(DepType::Required),
            "optional" | "Optional" => Ok(DepType::Optional),
            "suggestion" | "Suggestion" => Ok(DepType::Suggestion),
            other => Err(UnknownDepType(other.to_owned())),
        }
    }
}

/// A dependency edge as reported by the package manager during installation:
/// `package` pulled in `dependency`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportedDependency {
    pub package: PackageName,
    pub dependency: PackageName,
    pub dep_type: DepType,
}

impl ReportedDependency {
    pub fn new(
        package: impl Into<PackageName>,
        dependency: impl Into<PackageName>,
        dep_type: DepType,
    ) -> Self {
        Self {
            package: package.into(),
            dependency: dependency.into(),
            dep_type,
        }
    }
}

/// Package type recorded for a package installed as an optional dependency of `parent`.
pub fn optional_package_type(parent: &str) -> String {
    format!("optional({parent})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dep_type_parse_and_display() {
        for ty in DepType::ALL {
            assert_eq!(ty.as_str().parse::<DepType>().unwrap(), ty);
            assert_eq!(ty.to_string(), ty.as_str());
        }
    }

    #[test]
    fn dep_type_rejects_unknown() {
        let err = "recommended".parse::<DepType>().unwrap_err();
        assert_eq!(err, UnknownDepType("recommended".to_owned()));
        assert!(err.to_string().contains("recommended"));
    }

    #[test]
    fn dep_type_serde_is_lowercase() {
        let json = serde_json::to_string(&DepType::Suggestion).unwrap();
        assert_eq!(json, "\"suggestion\"");
    }

    #[test]
    fn optional_type_names_parent() {
        assert_eq!(optional_package_type("firefox"), "optional(firefox)");
    }
}
