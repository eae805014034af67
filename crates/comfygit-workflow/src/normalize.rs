use serde_json::Value;

use comfygit_cache::content_digest;

/// Fields the host rewrites on every save without changing what the
/// workflow does.
const VOLATILE_TOP_LEVEL: &[&str] = &["extra", "state", "revision"];
const VOLATILE_NODE_FIELDS: &[&str] = &["pos", "size", "order", "flags", "bgcolor", "color"];

/// Strip volatile UI state so two saves of the same graph compare equal.
pub fn normalize_workflow(raw: &Value) -> Value {
    let mut normalized = raw.clone();
    if let Some(object) = normalized.as_object_mut() {
        for field in VOLATILE_TOP_LEVEL {
            object.remove(*field);
        }
        if let Some(nodes) = object.get_mut("nodes") {
            match nodes {
                Value::Array(items) => {
                    for item in items {
                        strip_node_fields(item);
                    }
                }
                Value::Object(items) => {
                    for (_, item) in items {
                        strip_node_fields(item);
                    }
                }
                _ => {}
            }
        }
    }
    normalized
}

fn strip_node_fields(node: &mut Value) {
    if let Some(object) = node.as_object_mut() {
        for field in VOLATILE_NODE_FIELDS {
            object.remove(*field);
        }
    }
}

/// Content hash of the normalized form, for change detection.
pub fn workflow_content_hash(raw: &Value) -> String {
    let normalized = normalize_workflow(raw);
    let bytes = serde_json::to_vec(&normalized).unwrap_or_default();
    content_digest(&bytes)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ui_only_changes_compare_equal() {
        let saved = json!({
            "nodes": [{"id": 1, "type": "KSampler", "pos": [10, 20], "widgets_values": [5]}],
            "extra": {"ds": {"scale": 1.0}}
        });
        let resaved = json!({
            "nodes": [{"id": 1, "type": "KSampler", "pos": [300, 40], "widgets_values": [5]}],
            "extra": {"ds": {"scale": 2.5, "offset": [7, 7]}}
        });
        assert_eq!(workflow_content_hash(&saved), workflow_content_hash(&resaved));
    }

    #[test]
    fn semantic_changes_do_not() {
        let saved = json!({
            "nodes": [{"id": 1, "type": "KSampler", "widgets_values": [5]}]
        });
        let edited = json!({
            "nodes": [{"id": 1, "type": "KSampler", "widgets_values": [9]}]
        });
        assert_ne!(workflow_content_hash(&saved), workflow_content_hash(&edited));
    }
}
