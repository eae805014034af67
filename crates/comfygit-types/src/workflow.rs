use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single value from a node's `widgets_values` list.
///
/// The host stores these as a runtime-typed JSON array; anything that is
/// not a recognized scalar is preserved verbatim as `Other` so the
/// workflow round-trips byte-for-byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WidgetValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Other(Value),
}

impl WidgetValue {
    /// The string payload, if this widget holds text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for WidgetValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// A node as parsed out of a workflow document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub inputs: IndexMap<String, Value>,
    #[serde(default)]
    pub widgets_values: Vec<WidgetValue>,
    #[serde(default)]
    pub properties: IndexMap<String, Value>,
}

impl WorkflowNode {
    /// The canonical registry id of the providing package, if the host
    /// recorded one when the workflow was saved.
    pub fn cnr_id(&self) -> Option<&str> {
        self.properties.get("cnr_id").and_then(Value::as_str)
    }

    /// The commit the providing package was at when the workflow was saved.
    pub fn ver(&self) -> Option<&str> {
        self.properties.get("ver").and_then(Value::as_str)
    }
}

/// The stable address of a single model slot inside a workflow: which
/// node, which widget, and the value it held at analysis time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowNodeWidgetRef {
    pub node_id: String,
    pub node_type: String,
    pub widget_index: usize,
    pub widget_value: String,
}

impl WorkflowNodeWidgetRef {
    /// The key model references are deduplicated by: the same value in
    /// the same loader type is one decision, however many nodes share it.
    pub fn group_key(&self) -> (&str, &str) {
        (&self.widget_value, &self.node_type)
    }
}

/// Complete dependency analysis for one workflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDependencies {
    pub workflow_name: String,
    pub workflow_path: PathBuf,
    pub builtin_nodes: Vec<WorkflowNode>,
    pub non_builtin_nodes: Vec<WorkflowNode>,
    /// Every widget that looks like a model reference, in encounter order.
    pub found_models: Vec<WorkflowNodeWidgetRef>,
}

impl WorkflowDependencies {
    pub fn is_empty(&self) -> bool {
        self.builtin_nodes.is_empty()
            && self.non_builtin_nodes.is_empty()
            && self.found_models.is_empty()
    }
}

/// File-level sync state between the host's workflow directory and the
/// committed copies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSyncStatus {
    pub new: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub synced: Vec<String>,
}

impl WorkflowSyncStatus {
    pub fn is_clean(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}
