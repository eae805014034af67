use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use comfygit_types::{CustomNodeMapping, ManifestModel, NodeInstall, WorkflowModel};

/// Everything the node tiers consult besides the registry mirror.
#[derive(Debug, Default)]
pub struct NodeResolutionContext {
    pub workflow_name: String,
    /// Nodes already installed in the environment (from the manifest).
    pub installed_packages: IndexMap<String, NodeInstall>,
    /// The workflow's `custom_node_map` overrides.
    pub custom_mappings: IndexMap<String, CustomNodeMapping>,
    /// Types resolved earlier in this pass: `type → package id`. Every
    /// successful tier writes here so later occurrences short-circuit.
    pub session: FxHashMap<String, String>,
    pub auto_select_ambiguous: bool,
}

impl NodeResolutionContext {
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            auto_select_ambiguous: true,
            ..Self::default()
        }
    }
}

/// Everything the model tiers consult besides the model repository.
#[derive(Debug, Default)]
pub struct ModelResolutionContext {
    pub workflow_name: String,
    /// Previous manifest entries for this workflow, keyed by the widget
    /// value they were recorded under. Enables reuse and download-intent
    /// carryover across sessions.
    pub previous_resolutions: FxHashMap<String, WorkflowModel>,
    /// The global models table, keyed by hash.
    pub global_models: FxHashMap<String, ManifestModel>,
    pub auto_select_ambiguous: bool,
}

impl ModelResolutionContext {
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            auto_select_ambiguous: true,
            ..Self::default()
        }
    }
}
