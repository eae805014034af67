use std::collections::HashSet;

use tracing::debug;

use comfygit_types::{WorkflowNode, WorkflowNodeWidgetRef};

use crate::config::{ModelPathConfig, BUILTIN_NODE_TYPES};
use crate::document::WorkflowDocument;

/// Nodes partitioned into builtin and non-builtin.
#[derive(Debug, Default)]
pub struct NodeClassification {
    pub builtin_nodes: Vec<WorkflowNode>,
    pub non_builtin_nodes: Vec<WorkflowNode>,
}

/// Partition a workflow's nodes against the builtin set, in encounter
/// order.
pub fn classify_nodes(document: &WorkflowDocument) -> NodeClassification {
    let builtin: HashSet<&str> = BUILTIN_NODE_TYPES.iter().copied().collect();
    let mut classification = NodeClassification::default();
    for node in document.nodes().values() {
        if builtin.contains(node.node_type.as_str()) {
            classification.builtin_nodes.push(node.clone());
        } else {
            classification.non_builtin_nodes.push(node.clone());
        }
    }
    debug!(
        "Classified {} builtin and {} non-builtin nodes",
        classification.builtin_nodes.len(),
        classification.non_builtin_nodes.len()
    );
    classification
}

/// Extract every widget that references a model, in encounter order.
///
/// A widget qualifies if its node is a known loader type (the configured
/// widget slot), or if its text value carries a model extension. The
/// result is deterministic for a given document and config.
pub fn extract_model_refs(
    document: &WorkflowDocument,
    config: &ModelPathConfig,
) -> Vec<WorkflowNodeWidgetRef> {
    let mut refs = Vec::new();
    let mut seen: HashSet<(String, usize)> = HashSet::new();

    for node in document.nodes().values() {
        if config.is_model_loader_node(&node.node_type) {
            let index = config.widget_index_for_node(&node.node_type);
            if let Some(value) = node
                .widgets_values
                .get(index)
                .and_then(|widget| widget.as_text())
            {
                if !value.trim().is_empty() && seen.insert((node.id.clone(), index)) {
                    refs.push(WorkflowNodeWidgetRef {
                        node_id: node.id.clone(),
                        node_type: node.node_type.clone(),
                        widget_index: index,
                        widget_value: value.to_string(),
                    });
                }
            }
        }

        for (index, widget) in node.widgets_values.iter().enumerate() {
            let Some(value) = widget.as_text() else {
                continue;
            };
            if config.looks_like_model(value) && seen.insert((node.id.clone(), index)) {
                refs.push(WorkflowNodeWidgetRef {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                    widget_index: index,
                    widget_value: value.to_string(),
                });
            }
        }
    }
    refs
}
