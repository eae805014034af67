use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::ModelWithLocation;
use crate::node::RegistryPackage;
use crate::workflow::{WorkflowNode, WorkflowNodeWidgetRef};

/// Which tier produced a node match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeMatchType {
    SessionCache,
    CustomMapping,
    Properties,
    Exact,
    TypeOnly,
    Fuzzy,
    /// A strategy decision the user confirmed interactively.
    UserConfirmed,
    /// A package id the user typed in directly.
    Manual,
    Heuristic,
    /// A deliberate skip recorded as "this type needs no package".
    Optional,
}

impl NodeMatchType {
    /// Match types that represent a user intervention worth persisting in
    /// the per-workflow custom node map.
    pub fn is_user_intervention(self) -> bool {
        matches!(self, Self::UserConfirmed | Self::Manual | Self::Heuristic)
    }
}

/// Which tier produced a model match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelMatchType {
    /// Reused from a previous manifest entry whose hash still resolves.
    Manifest,
    Exact,
    Reconstructed,
    CaseInsensitive,
    Filename,
    /// A planned download: no resolved model yet, sources + target set.
    DownloadIntent,
    /// A strategy decision (fuzzy pick or optional-unresolved marking).
    UserConfirmed,
}

/// A node type resolved to a providing package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedNodePackage {
    pub package_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<RegistryPackage>,
    pub node_type: String,
    #[serde(default)]
    pub versions: Vec<String>,
    pub match_type: NodeMatchType,
    pub confidence: f64,
}

/// Why a resolved model's on-disk category does not satisfy its loader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryMismatch {
    pub expected: Vec<String>,
    pub actual: Option<String>,
}

/// A model reference matched to an on-disk model, a download intent, or a
/// deliberate optional-unresolved marking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedModel {
    pub reference: WorkflowNodeWidgetRef,
    /// `None` for download intents and optional-unresolved entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ModelWithLocation>,
    /// Download URL, for download intents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub is_optional: bool,
    pub match_type: ModelMatchType,
    pub confidence: f64,
    /// Target path for an intended download.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    /// The workflow JSON still holds a different path than the resolved
    /// location; the batch path update will rewrite it.
    #[serde(default)]
    pub needs_path_sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_mismatch: Option<CategoryMismatch>,
}

impl ResolvedModel {
    pub fn is_download_intent(&self) -> bool {
        self.match_type == ModelMatchType::DownloadIntent
    }

    /// Re-point this resolution at another reference from the same dedup
    /// group; everything else carries over.
    pub fn for_reference(&self, reference: WorkflowNodeWidgetRef) -> Self {
        Self {
            reference,
            ..self.clone()
        }
    }
}

/// The outcome of one resolver pass over a workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub workflow_name: String,
    pub nodes_resolved: Vec<ResolvedNodePackage>,
    pub nodes_unresolved: Vec<WorkflowNode>,
    pub nodes_ambiguous: Vec<Vec<ResolvedNodePackage>>,
    pub models_resolved: Vec<ResolvedModel>,
    pub models_unresolved: Vec<WorkflowNodeWidgetRef>,
    pub models_ambiguous: Vec<Vec<ResolvedModel>>,
}

impl ResolutionResult {
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            ..Self::default()
        }
    }

    /// No ambiguity or unresolved references remain.
    pub fn is_fully_resolved(&self) -> bool {
        self.nodes_unresolved.is_empty()
            && self.nodes_ambiguous.is_empty()
            && self.models_unresolved.is_empty()
            && self.models_ambiguous.is_empty()
    }

    pub fn issue_count(&self) -> usize {
        self.nodes_unresolved.len()
            + self.nodes_ambiguous.len()
            + self.models_unresolved.len()
            + self.models_ambiguous.len()
    }
}

/// Confidence label for a heuristic score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Possible,
    Good,
    High,
}

impl Confidence {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.85 {
            Self::High
        } else if score >= 0.65 {
            Self::Good
        } else if score >= 0.45 {
            Self::Possible
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => f.write_str("low"),
            Self::Possible => f.write_str("possible"),
            Self::Good => f.write_str("good"),
            Self::High => f.write_str("high"),
        }
    }
}

/// A ranked package candidate from the heuristic search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPackageMatch {
    pub package_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<RegistryPackage>,
    pub score: f64,
    pub confidence: Confidence,
}

/// A ranked model candidate from the fuzzy index search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredModelMatch {
    pub model: ModelWithLocation,
    pub score: f64,
    pub confidence: Confidence,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_thresholds() {
        assert_eq!(Confidence::from_score(0.9), Confidence::High);
        assert_eq!(Confidence::from_score(0.85), Confidence::High);
        assert_eq!(Confidence::from_score(0.7), Confidence::Good);
        assert_eq!(Confidence::from_score(0.5), Confidence::Possible);
        assert_eq!(Confidence::from_score(0.2), Confidence::Low);
    }

    #[test]
    fn empty_result_is_fully_resolved() {
        assert!(ResolutionResult::new("empty").is_fully_resolved());
    }
}
