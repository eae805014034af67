use indexmap::IndexMap;
use serde_json::Value;

/// The separator between a node type and its input signature in mapping
/// keys.
const KEY_SEPARATOR: &str = "::";

/// Build the mapping key for a node type and input signature.
pub fn node_key(node_type: &str, signature: &str) -> String {
    format!("{node_type}{KEY_SEPARATOR}{signature}")
}

/// The wildcard key matching a node type regardless of inputs.
pub fn type_only_key(node_type: &str) -> String {
    node_key(node_type, "_")
}

/// Normalize a node's inputs into a stable signature: the input names,
/// sorted and comma-joined. Returns `None` when there are no inputs to
/// sign.
pub fn input_signature(inputs: &IndexMap<String, Value>) -> Option<String> {
    if inputs.is_empty() {
        return None;
    }
    let mut names: Vec<&str> = inputs.keys().map(String::as_str).collect();
    names.sort_unstable();
    Some(names.join(","))
}
