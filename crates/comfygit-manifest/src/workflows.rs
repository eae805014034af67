use std::collections::BTreeSet;

use indexmap::IndexMap;
use toml_edit::{InlineTable, Item, Table, Value};
use tracing::debug;

use comfygit_types::{
    Criticality, CustomNodeMapping, ModelStatus, WorkflowModel, WorkflowNodeWidgetRef,
};

use crate::util::{array_of_strings, pretty_entry_array, ref_from_inline, ref_to_inline};
use crate::ManifestStore;

/// Typed access to `[tool.comfygit.workflows.*]`.
///
/// Each workflow entry holds its committed `path`, the package ids its
/// custom nodes resolve to, the model entries (one inline table per
/// model), and the per-workflow `custom_node_map` overrides.
pub struct WorkflowsTable<'a> {
    pub(crate) store: &'a mut ManifestStore,
}

impl WorkflowsTable<'_> {
    pub fn names(&self) -> Vec<String> {
        self.workflows_table()
            .map(|table| table.iter().map(|(name, _)| name.to_string()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workflow_table(name).is_some()
    }

    /// The committed path recorded for a workflow (relative to the
    /// manifest's directory).
    pub fn path(&self, name: &str) -> Option<String> {
        self.workflow_table(name)?
            .get("path")
            .and_then(Item::as_str)
            .map(ToString::to_string)
    }

    /// The resolved node package ids for a workflow.
    pub fn node_packs(&self, name: &str) -> Vec<String> {
        self.workflow_table(name)
            .and_then(|table| table.get("nodes"))
            .map(array_of_strings)
            .unwrap_or_default()
    }

    /// Replace a workflow's node pack list; `None` drops the key.
    pub fn set_node_packs(&mut self, name: &str, packs: Option<&BTreeSet<String>>) {
        let table = self.workflow_table_mut(name);
        match packs {
            Some(packs) if !packs.is_empty() => {
                let mut array = toml_edit::Array::new();
                for pack in packs {
                    array.push_formatted(Value::from(pack.as_str()));
                }
                for value in array.iter_mut() {
                    value.decor_mut().set_prefix("\n    ");
                }
                array.set_trailing("\n");
                array.set_trailing_comma(true);
                table["nodes"] = Item::Value(Value::Array(array));
            }
            _ => {
                table.remove("nodes");
            }
        }
    }

    /// Append one package id to the workflow's node list (progressive
    /// write after a single confirmed node decision).
    pub fn add_node_pack(&mut self, name: &str, package_id: &str) {
        let mut packs: BTreeSet<String> = self.node_packs(name).into_iter().collect();
        if packs.insert(package_id.to_string()) {
            self.set_node_packs(name, Some(&packs));
            debug!("Added {package_id} to workflow '{name}' nodes");
        }
    }

    pub fn get_workflow_models(&self, name: &str) -> Vec<WorkflowModel> {
        self.workflow_table(name)
            .and_then(|table| table.get("models"))
            .and_then(Item::as_array)
            .map(|array| {
                array
                    .iter()
                    .filter_map(Value::as_inline_table)
                    .filter_map(model_from_inline)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Insert one model entry, replacing any prior entry that records the
    /// same model.
    ///
    /// Replacement matches on filename or on an overlapping node
    /// reference: that is how an `unresolved` row becomes `resolved`
    /// without the model ending up in both states at once.
    pub fn add_workflow_model(&mut self, name: &str, model: &WorkflowModel) {
        let mut models = self.get_workflow_models(name);
        models.retain(|existing| {
            existing.filename != model.filename && !refs_overlap(&existing.nodes, &model.nodes)
        });
        models.push(model.clone());
        self.set_workflow_models(name, &models);
    }

    /// Replace the full model list for a workflow.
    pub fn set_workflow_models(&mut self, name: &str, models: &[WorkflowModel]) {
        let table = self.workflow_table_mut(name);
        if models.is_empty() {
            table.remove("models");
            return;
        }
        let array = pretty_entry_array(models.iter().map(model_to_inline));
        table["models"] = Item::Value(Value::Array(array));
    }

    pub fn custom_node_map(&self, name: &str) -> IndexMap<String, CustomNodeMapping> {
        let Some(map) = self
            .workflow_table(name)
            .and_then(|table| table.get("custom_node_map"))
            .and_then(Item::as_table_like)
        else {
            return IndexMap::new();
        };
        map.iter()
            .filter_map(|(node_type, item)| {
                let mapping = match item {
                    Item::Value(Value::String(id)) if id.value() == "skip" => {
                        CustomNodeMapping::Skip
                    }
                    Item::Value(Value::String(id)) => {
                        CustomNodeMapping::Package(id.value().clone())
                    }
                    Item::Value(Value::Boolean(flag)) if !flag.value() => CustomNodeMapping::Skip,
                    _ => return None,
                };
                Some((node_type.to_string(), mapping))
            })
            .collect()
    }

    /// Record an override for one node type; `None` marks the type as
    /// deliberately unresolvable.
    pub fn set_custom_node_mapping(&mut self, name: &str, node_type: &str, package_id: Option<&str>) {
        let table = self.workflow_table_mut(name);
        let map = table
            .entry("custom_node_map")
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .expect("`custom_node_map` is a table");
        match package_id {
            Some(package_id) => {
                map.insert(node_type, toml_edit::value(package_id));
            }
            None => {
                map.insert(node_type, toml_edit::value(false));
            }
        }
    }

    pub fn remove_custom_node_mapping(&mut self, name: &str, node_type: &str) -> bool {
        let Some(map) = self
            .workflow_table_mut_existing(name)
            .and_then(|table| table.get_mut("custom_node_map"))
            .and_then(Item::as_table_mut)
        else {
            return false;
        };
        map.remove(node_type).is_some()
    }

    /// Ensure the entry exists and record its committed path.
    pub fn set_path(&mut self, name: &str, path: &str) {
        let table = self.workflow_table_mut(name);
        table["path"] = toml_edit::value(path);
    }

    pub fn remove_workflows(&mut self, names: &[String]) -> usize {
        let Some(table) = self.workflows_table_mut() else {
            return 0;
        };
        let mut removed = 0;
        for name in names {
            if table.remove(name).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// Drop entries whose committed workflow file no longer exists.
    pub fn remove_missing(&mut self) -> usize {
        let env_dir = self.store.env_dir().to_path_buf();
        let stale: Vec<String> = self
            .names()
            .into_iter()
            .filter(|name| {
                let relative = self
                    .path(name)
                    .unwrap_or_else(|| format!("workflows/{name}.json"));
                !env_dir.join(relative).exists()
            })
            .collect();
        self.remove_workflows(&stale)
    }

    fn workflows_table(&self) -> Option<&Table> {
        self.store
            .comfygit_table()?
            .get("workflows")?
            .as_table()
    }

    fn workflows_table_mut(&mut self) -> Option<&mut Table> {
        self.store
            .comfygit_table_mut()
            .get_mut("workflows")
            .and_then(Item::as_table_mut)
    }

    fn workflow_table(&self, name: &str) -> Option<&Table> {
        self.workflows_table()?.get(name)?.as_table()
    }

    fn workflow_table_mut_existing(&mut self, name: &str) -> Option<&mut Table> {
        self.workflows_table_mut()?
            .get_mut(name)
            .and_then(Item::as_table_mut)
    }

    fn workflow_table_mut(&mut self, name: &str) -> &mut Table {
        let comfygit = self.store.comfygit_table_mut();
        let workflows = comfygit
            .entry("workflows")
            .or_insert(Item::Table({
                let mut table = Table::new();
                table.set_implicit(true);
                table
            }))
            .as_table_mut()
            .expect("`tool.comfygit.workflows` is a table");
        let entry = workflows
            .entry(name)
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .expect("workflow entry is a table");
        if !entry.contains_key("path") {
            entry["path"] = toml_edit::value(format!("workflows/{name}.json"));
        }
        entry
    }
}

fn refs_overlap(a: &[WorkflowNodeWidgetRef], b: &[WorkflowNodeWidgetRef]) -> bool {
    a.iter().any(|left| {
        b.iter().any(|right| {
            left.node_id == right.node_id && left.widget_index == right.widget_index
        })
    })
}

fn model_to_inline(model: &WorkflowModel) -> InlineTable {
    let mut table = InlineTable::new();
    if let Some(hash) = &model.hash {
        table.insert("hash", hash.as_str().into());
    }
    table.insert("filename", model.filename.as_str().into());
    table.insert("category", model.category.as_str().into());
    table.insert("criticality", model.criticality.to_string().into());
    table.insert("status", model.status.to_string().into());
    if !model.sources.is_empty() {
        let mut sources = toml_edit::Array::new();
        for source in &model.sources {
            sources.push(source.as_str());
        }
        table.insert("sources", Value::Array(sources));
    }
    if let Some(relative_path) = &model.relative_path {
        table.insert("relative_path", relative_path.as_str().into());
    }
    let mut nodes = toml_edit::Array::new();
    for reference in &model.nodes {
        nodes.push_formatted(Value::InlineTable(ref_to_inline(reference)));
    }
    table.insert("nodes", Value::Array(nodes));
    table
}

fn model_from_inline(table: &InlineTable) -> Option<WorkflowModel> {
    let get = |key: &str| {
        table
            .get(key)
            .and_then(Value::as_str)
            .map(ToString::to_string)
    };
    Some(WorkflowModel {
        filename: get("filename")?,
        category: get("category").unwrap_or_default(),
        criticality: get("criticality")
            .and_then(|value| value.parse().ok())
            .unwrap_or(Criticality::Required),
        status: get("status")
            .and_then(|value| value.parse().ok())
            .unwrap_or(ModelStatus::Unresolved),
        nodes: table
            .get("nodes")
            .and_then(Value::as_array)
            .map(|array| {
                array
                    .iter()
                    .filter_map(Value::as_inline_table)
                    .filter_map(ref_from_inline)
                    .collect()
            })
            .unwrap_or_default(),
        hash: get("hash"),
        sources: table
            .get("sources")
            .and_then(Value::as_array)
            .map(|array| {
                array
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        relative_path: get("relative_path"),
    })
}
