use std::io::Write;
use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

use comfygit_types::{WidgetValue, WorkflowNode};

use crate::Error;

/// A workflow document: the parsed node set plus the raw JSON value it
/// came from.
///
/// The raw value is the source of truth on save — the core mutates only
/// `nodes[*].widgets_values[i]`, everything else (links, groups, UI
/// state, unknown fields) is preserved as the host wrote it.
#[derive(Debug, Clone)]
pub struct WorkflowDocument {
    raw: Value,
    nodes: IndexMap<String, WorkflowNode>,
}

impl WorkflowDocument {
    /// Load a workflow from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let bytes = match fs_err::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Missing(path.to_path_buf()));
            }
            Err(err) => return Err(err.into()),
        };
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        let raw: Value = serde_json::from_slice(bytes)?;
        let nodes = parse_nodes(&raw);
        Ok(Self { raw, nodes })
    }

    /// Nodes in encounter order, keyed by id.
    pub fn nodes(&self) -> &IndexMap<String, WorkflowNode> {
        &self.nodes
    }

    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(node_id)
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Overwrite one widget value, in both the parsed node and the raw
    /// document.
    ///
    /// Returns `false` when the node or widget slot does not exist; a
    /// stale reference is not an error, just a skipped update.
    pub fn set_widget_value(&mut self, node_id: &str, widget_index: usize, value: &str) -> bool {
        let Some(node) = self.nodes.get_mut(node_id) else {
            return false;
        };
        let Some(slot) = node.widgets_values.get_mut(widget_index) else {
            return false;
        };
        *slot = WidgetValue::Text(value.to_string());

        let Some(raw_values) = raw_widgets_values(&mut self.raw, node_id) else {
            return false;
        };
        let Some(raw_slot) = raw_values.get_mut(widget_index) else {
            return false;
        };
        *raw_slot = Value::String(value.to_string());
        true
    }

    /// Serialize back to disk atomically (temp file, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        let parent = path.parent().filter(|parent| !parent.as_os_str().is_empty());
        if let Some(parent) = parent {
            fs_err::create_dir_all(parent)?;
        }
        let mut temp = match parent {
            Some(parent) => tempfile::NamedTempFile::new_in(parent)?,
            None => tempfile::NamedTempFile::new()?,
        };
        serde_json::to_writer(&mut temp, &self.raw)?;
        temp.flush()?;
        temp.persist(path).map_err(|err| Error::Io(err.error))?;
        debug!("Saved workflow to {}", path.display());
        Ok(())
    }
}

/// Pull the node list out of a raw workflow value.
///
/// The host saves `nodes` as a list; some exports use a map keyed by node
/// id. Both are tolerated, and node ids are coerced to strings.
fn parse_nodes(raw: &Value) -> IndexMap<String, WorkflowNode> {
    let mut nodes = IndexMap::new();
    match raw.get("nodes") {
        Some(Value::Array(items)) => {
            for item in items {
                if let Some(node) = parse_node(item, None) {
                    nodes.insert(node.id.clone(), node);
                }
            }
        }
        Some(Value::Object(items)) => {
            for (key, item) in items {
                if let Some(node) = parse_node(item, Some(key)) {
                    nodes.insert(node.id.clone(), node);
                }
            }
        }
        _ => {}
    }
    nodes
}

fn parse_node(value: &Value, fallback_id: Option<&str>) -> Option<WorkflowNode> {
    let object = value.as_object()?;
    let id = match object.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => fallback_id?.to_string(),
    };
    let node_type = object.get("type")?.as_str()?.to_string();
    let inputs = parse_inputs(object.get("inputs"));
    let widgets_values = object
        .get("widgets_values")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .map(|value| {
                    serde_json::from_value(value.clone())
                        .unwrap_or_else(|_| WidgetValue::Other(value.clone()))
                })
                .collect()
        })
        .unwrap_or_default();
    let properties = object
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect()
        })
        .unwrap_or_default();

    Some(WorkflowNode {
        id,
        node_type,
        inputs,
        widgets_values,
        properties,
    })
}

/// Inputs appear as a map (API format) or as a list of `{name, ...}`
/// objects (UI format).
fn parse_inputs(value: Option<&Value>) -> IndexMap<String, Value> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| {
                let name = item.get("name")?.as_str()?;
                Some((name.to_string(), item.clone()))
            })
            .collect(),
        _ => IndexMap::new(),
    }
}

fn raw_widgets_values<'a>(raw: &'a mut Value, node_id: &str) -> Option<&'a mut Vec<Value>> {
    let node = match raw.get_mut("nodes")? {
        Value::Array(items) => items.iter_mut().find(|item| {
            match item.get("id") {
                Some(Value::String(id)) => id == node_id,
                Some(Value::Number(id)) => id.to_string() == node_id,
                _ => false,
            }
        })?,
        Value::Object(items) => items.get_mut(node_id)?,
        _ => return None,
    };
    match node.get_mut("widgets_values")? {
        Value::Array(values) => Some(values),
        _ => None,
    }
}
