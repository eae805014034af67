use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a custom node was installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeSourceKind {
    /// Installed from the node registry by id.
    Registry,
    /// Cloned from a Git URL.
    Git,
    /// A local directory the user is actively editing.
    Development,
}

impl fmt::Display for NodeSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry => f.write_str("registry"),
            Self::Git => f.write_str("git"),
            Self::Development => f.write_str("development"),
        }
    }
}

impl FromStr for NodeSourceKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registry" => Ok(Self::Registry),
            "git" => Ok(Self::Git),
            "development" => Ok(Self::Development),
            _ => Err(()),
        }
    }
}

/// What the manifest records for one installed custom node.
///
/// The map key in the manifest is the package id (registry id or Git URL);
/// the install carries everything needed to reproduce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInstall {
    pub name: String,
    /// Resolved version: a registry tag, a commit, or `"dev"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub source: NodeSourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_commit: Option<String>,
    /// Names of the dependency sources this install introduced into the
    /// Python configuration; removed again when the node is removed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependency_sources: Vec<String>,
}

impl NodeInstall {
    pub fn is_dev(&self) -> bool {
        self.source == NodeSourceKind::Development
    }
}

/// One published version of a registry package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryPackageVersion {
    #[serde(default)]
    pub changelog: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub deprecated: bool,
    #[serde(default)]
    pub download_url: String,
}

/// A package as the global node registry describes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryPackage {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default)]
    pub versions: BTreeMap<String, RegistryPackageVersion>,
}

impl RegistryPackage {
    /// The highest version key, if any were published.
    pub fn latest_version(&self) -> Option<&str> {
        self.versions.keys().next_back().map(String::as_str)
    }
}
