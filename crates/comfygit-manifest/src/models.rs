use std::collections::HashSet;

use toml_edit::{InlineTable, Item, Table, Value};
use tracing::debug;

use comfygit_types::ManifestModel;

use crate::ManifestStore;

/// Typed access to `[tool.comfygit.models]`: the global, hash-keyed
/// models table.
pub struct ModelsTable<'a> {
    pub(crate) store: &'a mut ManifestStore,
}

impl ModelsTable<'_> {
    pub fn get_all(&self) -> Vec<ManifestModel> {
        let Some(table) = self
            .store
            .comfygit_table()
            .and_then(|comfygit| comfygit.get("models"))
            .and_then(Item::as_table)
        else {
            return Vec::new();
        };
        table
            .iter()
            .filter_map(|(hash, item)| {
                let inline = item.as_inline_table()?;
                model_from_inline(hash, inline)
            })
            .collect()
    }

    pub fn get(&self, hash: &str) -> Option<ManifestModel> {
        self.get_all().into_iter().find(|model| model.hash == hash)
    }

    /// Insert or refresh a row; the hash is the key, so re-adding merges
    /// the latest filename/path/sources.
    pub fn add_model(&mut self, model: &ManifestModel) {
        let table = self.models_table_mut();
        table.insert(
            &model.hash,
            Item::Value(Value::InlineTable(model_to_inline(model))),
        );
    }

    pub fn remove_model(&mut self, hash: &str) -> bool {
        let Some(table) = self
            .store
            .comfygit_table_mut()
            .get_mut("models")
            .and_then(Item::as_table_mut)
        else {
            return false;
        };
        table.remove(hash).is_some()
    }

    /// Drop rows no workflow references. Runs after the workflow sections
    /// have been reconciled, so a hash kept alive by any surviving
    /// workflow entry stays.
    pub fn cleanup_orphans(&mut self) -> usize {
        let referenced: HashSet<String> = {
            let workflows = crate::WorkflowsTable {
                store: &mut *self.store,
            };
            workflows
                .names()
                .iter()
                .flat_map(|name| workflows.get_workflow_models(name))
                .filter_map(|model| model.hash)
                .collect()
        };

        let orphans: Vec<String> = self
            .get_all()
            .into_iter()
            .filter(|model| !referenced.contains(&model.hash))
            .map(|model| model.hash)
            .collect();
        for hash in &orphans {
            self.remove_model(hash);
            debug!("Dropped orphaned global model row {hash}");
        }
        orphans.len()
    }

    fn models_table_mut(&mut self) -> &mut Table {
        let comfygit = self.store.comfygit_table_mut();
        comfygit
            .entry("models")
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .expect("`tool.comfygit.models` is a table")
    }
}

fn model_to_inline(model: &ManifestModel) -> InlineTable {
    let mut table = InlineTable::new();
    table.insert("filename", model.filename.as_str().into());
    table.insert("size", (model.size as i64).into());
    table.insert("relative_path", model.relative_path.as_str().into());
    table.insert("category", model.category.as_str().into());
    if !model.sources.is_empty() {
        let mut sources = toml_edit::Array::new();
        for source in &model.sources {
            sources.push(source.as_str());
        }
        table.insert("sources", Value::Array(sources));
    }
    table
}

fn model_from_inline(hash: &str, table: &InlineTable) -> Option<ManifestModel> {
    Some(ManifestModel {
        hash: hash.to_string(),
        filename: table.get("filename")?.as_str()?.to_string(),
        size: table.get("size").and_then(Value::as_integer).unwrap_or(0) as u64,
        relative_path: table
            .get("relative_path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        category: table
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
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
    })
}
