use indexmap::IndexMap;
use toml_edit::{InlineTable, Item, Table, Value};
use tracing::debug;

use comfygit_types::{NodeInstall, NodeSourceKind};

use crate::util::{array_of_strings, string_array};
use crate::{Error, ManifestStore};

/// Typed access to `[tool.comfygit.nodes]`: one inline table per
/// installed node, keyed by package id.
pub struct NodesTable<'a> {
    pub(crate) store: &'a mut ManifestStore,
}

impl NodesTable<'_> {
    /// Every installed node, in manifest order.
    pub fn get_existing(&self) -> IndexMap<String, NodeInstall> {
        let Some(table) = self
            .store
            .comfygit_table()
            .and_then(|comfygit| comfygit.get("nodes"))
            .and_then(Item::as_table)
        else {
            return IndexMap::new();
        };
        table
            .iter()
            .filter_map(|(id, item)| {
                let inline = item.as_inline_table()?;
                Some((id.to_string(), install_from_inline(inline)?))
            })
            .collect()
    }

    /// The dev subset: nodes whose source is `development`.
    pub fn dev_nodes(&self) -> IndexMap<String, NodeInstall> {
        self.get_existing()
            .into_iter()
            .filter(|(_, install)| install.is_dev())
            .collect()
    }

    pub fn get(&self, package_id: &str) -> Option<NodeInstall> {
        self.get_existing().shift_remove(package_id)
    }

    pub fn contains(&self, package_id: &str) -> bool {
        self.get_existing().contains_key(package_id)
    }

    /// Add a node install. Duplicate ids, or another id carrying the same
    /// node name, are a conflict: remove the existing node first.
    pub fn add(&mut self, package_id: &str, install: &NodeInstall) -> Result<(), Error> {
        let existing = self.get_existing();
        if existing.contains_key(package_id) {
            return Err(Error::NodeConflict(package_id.to_string()));
        }
        if existing
            .values()
            .any(|candidate| candidate.name == install.name)
        {
            return Err(Error::NodeConflict(install.name.clone()));
        }

        let table = self.nodes_table_mut();
        table.insert(
            package_id,
            Item::Value(Value::InlineTable(install_to_inline(install))),
        );
        debug!("Added node '{package_id}' to the manifest");
        Ok(())
    }

    /// Replace or insert without the conflict check (sync paths that
    /// already decided what the manifest must say).
    pub fn upsert(&mut self, package_id: &str, install: &NodeInstall) {
        let table = self.nodes_table_mut();
        table.insert(
            package_id,
            Item::Value(Value::InlineTable(install_to_inline(install))),
        );
    }

    pub fn remove(&mut self, package_id: &str) -> bool {
        let Some(table) = self
            .store
            .comfygit_table_mut()
            .get_mut("nodes")
            .and_then(Item::as_table_mut)
        else {
            return false;
        };
        let removed = table.remove(package_id).is_some();
        if removed {
            debug!("Removed node '{package_id}' from the manifest");
        }
        removed
    }

    fn nodes_table_mut(&mut self) -> &mut Table {
        let comfygit = self.store.comfygit_table_mut();
        comfygit
            .entry("nodes")
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .expect("`tool.comfygit.nodes` is a table")
    }
}

fn install_to_inline(install: &NodeInstall) -> InlineTable {
    let mut table = InlineTable::new();
    table.insert("name", install.name.as_str().into());
    if let Some(version) = &install.version {
        table.insert("version", version.as_str().into());
    }
    table.insert("source", install.source.to_string().into());
    if let Some(registry_id) = &install.registry_id {
        table.insert("registry_id", registry_id.as_str().into());
    }
    if let Some(repository) = &install.repository {
        table.insert("repository", repository.as_str().into());
    }
    if let Some(download_url) = &install.download_url {
        table.insert("download_url", download_url.as_str().into());
    }
    if let Some(branch) = &install.branch {
        table.insert("branch", branch.as_str().into());
    }
    if let Some(pinned_commit) = &install.pinned_commit {
        table.insert("pinned_commit", pinned_commit.as_str().into());
    }
    if !install.dependency_sources.is_empty() {
        table.insert(
            "dependency_sources",
            Value::Array(string_array(install.dependency_sources.clone())),
        );
    }
    table
}

fn install_from_inline(table: &InlineTable) -> Option<NodeInstall> {
    let get = |key: &str| table.get(key).and_then(Value::as_str).map(ToString::to_string);
    Some(NodeInstall {
        name: get("name")?,
        version: get("version"),
        source: get("source")
            .and_then(|source| source.parse().ok())
            .unwrap_or(NodeSourceKind::Registry),
        registry_id: get("registry_id"),
        repository: get("repository"),
        download_url: get("download_url"),
        branch: get("branch"),
        pinned_commit: get("pinned_commit"),
        dependency_sources: table
            .get("dependency_sources")
            .map(|value| array_of_strings(&Item::Value(value.clone())))
            .unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ManifestStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pyproject.toml");
        let store = ManifestStore::init(&path, "env", "3.12", "v0.3.60").unwrap();
        (dir, store)
    }

    fn registry_install(name: &str) -> NodeInstall {
        NodeInstall {
            name: name.to_string(),
            version: Some("1.0.7".to_string()),
            source: NodeSourceKind::Registry,
            registry_id: Some(name.to_string()),
            repository: None,
            download_url: None,
            branch: None,
            pinned_commit: None,
            dependency_sources: vec![],
        }
    }

    #[test]
    fn add_roundtrips_through_toml() -> anyhow::Result<()> {
        let (_dir, mut store) = store();
        let install = NodeInstall {
            repository: Some("https://github.com/Fannovel16/comfyui_controlnet_aux".to_string()),
            dependency_sources: vec!["opencv".to_string()],
            ..registry_install("comfyui_controlnet_aux")
        };
        store.nodes().add("comfyui_controlnet_aux", &install)?;
        store.save()?;

        let mut reloaded = ManifestStore::load(store.path())?;
        let existing = reloaded.nodes().get_existing();
        assert_eq!(existing.get("comfyui_controlnet_aux"), Some(&install));
        Ok(())
    }

    #[test]
    fn duplicate_adds_conflict() -> anyhow::Result<()> {
        let (_dir, mut store) = store();
        store.nodes().add("pkg-a", &registry_install("pkg-a"))?;
        assert!(matches!(
            store.nodes().add("pkg-a", &registry_install("pkg-a")),
            Err(Error::NodeConflict(_))
        ));
        // Same display name under a different id is also a conflict.
        assert!(matches!(
            store.nodes().add("pkg-b", &registry_install("pkg-a")),
            Err(Error::NodeConflict(_))
        ));
        Ok(())
    }

    #[test]
    fn removing_all_nodes_drops_the_section() -> anyhow::Result<()> {
        let (_dir, mut store) = store();
        store.nodes().add("pkg-a", &registry_install("pkg-a"))?;
        assert!(store.nodes().remove("pkg-a"));
        store.save()?;
        let text = fs_err::read_to_string(store.path())?;
        assert!(!text.contains("[tool.comfygit.nodes]"));
        Ok(())
    }

    #[test]
    fn dev_nodes_are_a_source_filter() -> anyhow::Result<()> {
        let (_dir, mut store) = store();
        store.nodes().add("pkg-a", &registry_install("pkg-a"))?;
        store.nodes().add(
            "my-wip-node",
            &NodeInstall {
                name: "my-wip-node".to_string(),
                version: Some("dev".to_string()),
                source: NodeSourceKind::Development,
                registry_id: None,
                repository: None,
                download_url: None,
                branch: None,
                pinned_commit: None,
                dependency_sources: vec![],
            },
        )?;

        let dev = store.nodes().dev_nodes();
        assert_eq!(dev.len(), 1);
        assert!(dev.contains_key("my-wip-node"));
        Ok(())
    }
}
