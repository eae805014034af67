use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::workflow::WorkflowNodeWidgetRef;

/// How much a workflow cares about a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    /// The workflow is broken without this exact model.
    Required,
    /// A substitute of the same kind would do.
    Flexible,
    /// The workflow is considered complete without it.
    Optional,
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => f.write_str("required"),
            Self::Flexible => f.write_str("flexible"),
            Self::Optional => f.write_str("optional"),
        }
    }
}

impl FromStr for Criticality {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "required" => Ok(Self::Required),
            "flexible" => Ok(Self::Flexible),
            "optional" => Ok(Self::Optional),
            _ => Err(()),
        }
    }
}

/// Whether a workflow-model entry has been matched to an on-disk model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Resolved,
    Unresolved,
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved => f.write_str("resolved"),
            Self::Unresolved => f.write_str("unresolved"),
        }
    }
}

impl FromStr for ModelStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resolved" => Ok(Self::Resolved),
            "unresolved" => Ok(Self::Unresolved),
            _ => Err(()),
        }
    }
}

/// A row in the global, hash-keyed models table.
///
/// This table is reference-counted against workflow entries: a row that no
/// workflow references is dropped on save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestModel {
    pub hash: String,
    pub filename: String,
    pub size: u64,
    pub relative_path: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

/// One model entry inside a workflow's manifest section.
///
/// `nodes` carries every reference to this model across the workflow: one
/// entry per (filename, node-type) group, so a model loaded by twenty
/// nodes is one logical line in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowModel {
    pub filename: String,
    pub category: String,
    pub criticality: Criticality,
    pub status: ModelStatus,
    pub nodes: Vec<WorkflowNodeWidgetRef>,
    /// Present iff `status == Resolved`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Present on download intents and resolved entries with known origins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
    /// Target path for an intended download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
}

impl WorkflowModel {
    /// `true` for an entry that records a planned-but-not-executed fetch.
    pub fn is_download_intent(&self) -> bool {
        self.status == ModelStatus::Unresolved && !self.sources.is_empty()
    }

    /// The key a progressive write replaces on: resolving an entry keeps
    /// one logical row per filename rather than accumulating duplicates.
    pub fn replace_key(&self) -> (&str, ModelStatus) {
        (&self.filename, self.status)
    }
}

/// A per-workflow override for one node type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomNodeMapping {
    /// Future encounters of the type resolve to this package, no prompt.
    Package(String),
    /// The type is deliberately unresolvable; never prompt for it.
    Skip,
}

impl CustomNodeMapping {
    pub fn package_id(&self) -> Option<&str> {
        match self {
            Self::Package(id) => Some(id),
            Self::Skip => None,
        }
    }
}
