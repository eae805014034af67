use std::io::Write;
use std::path::{Path, PathBuf};

use toml_edit::{DocumentMut, Item, Table};
use tracing::debug;

pub use nodes::NodesTable;
pub use workflows::WorkflowsTable;

mod models;
mod nodes;
mod util;
mod workflows;

pub use models::ModelsTable;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to parse the manifest")]
    Parse(#[from] toml_edit::TomlError),

    #[error("Node '{0}' already exists in the manifest")]
    NodeConflict(String),
}

/// The canonical on-disk record of what a reproducible environment must
/// contain.
///
/// A `pyproject.toml`-shaped document: standard `[project]` metadata plus
/// everything ComfyGit owns under `[tool.comfygit]`. The document is
/// format-preserving; saves prune empty tables, drop workflow entries
/// whose file is gone, reference-count the global models table, and then
/// replace the file atomically.
#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    doc: DocumentMut,
}

impl ManifestStore {
    /// Parse the manifest at the given path. Parse failures surface; a
    /// corrupt manifest aborts the operation rather than being rebuilt.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let text = fs_err::read_to_string(&path)?;
        let doc: DocumentMut = text.parse()?;
        Ok(Self { path, doc })
    }

    /// Create a fresh manifest for a new environment.
    pub fn init(
        path: impl Into<PathBuf>,
        name: &str,
        python_version: &str,
        comfyui_version: &str,
    ) -> Result<Self, Error> {
        let path = path.into();
        let mut doc = DocumentMut::new();

        let mut project = Table::new();
        project["name"] = toml_edit::value(name);
        project["version"] = toml_edit::value("0.1.0");
        project["requires-python"] = toml_edit::value(format!(">={python_version}"));
        project["dependencies"] = Item::Value(toml_edit::Array::new().into());
        doc["project"] = Item::Table(project);

        let mut comfygit = Table::new();
        comfygit["python_version"] = toml_edit::value(python_version);
        comfygit["comfyui_version"] = toml_edit::value(comfyui_version);
        let mut tool = Table::new();
        tool.set_implicit(true);
        tool.insert("comfygit", Item::Table(comfygit));
        doc["tool"] = Item::Table(tool);

        let mut store = Self { path, doc };
        store.save()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The environment directory the manifest lives in (its parent).
    pub fn env_dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn nodes(&mut self) -> NodesTable<'_> {
        NodesTable { store: self }
    }

    pub fn workflows(&mut self) -> WorkflowsTable<'_> {
        WorkflowsTable { store: self }
    }

    pub fn models(&mut self) -> ModelsTable<'_> {
        ModelsTable { store: self }
    }

    pub fn python_version(&self) -> Option<&str> {
        self.comfygit_table()?
            .get("python_version")
            .and_then(Item::as_str)
    }

    pub fn comfyui_version(&self) -> Option<&str> {
        self.comfygit_table()?
            .get("comfyui_version")
            .and_then(Item::as_str)
    }

    pub fn set_comfyui_version(&mut self, version: &str) {
        self.comfygit_table_mut()["comfyui_version"] = toml_edit::value(version);
    }

    /// Serialized form of the current document (without saving).
    pub fn to_string_lossless(&self) -> String {
        self.doc.to_string()
    }

    /// Run the save-time invariants and write the file atomically.
    ///
    /// Order matters: workflow entries pointing at missing files go
    /// first, then orphan cleanup of the global models table runs against
    /// the surviving workflow sections.
    pub fn save(&mut self) -> Result<(), Error> {
        let removed_workflows = self.workflows().remove_missing();
        if removed_workflows > 0 {
            debug!("Removed {removed_workflows} workflow entries whose file is gone");
        }
        let removed_models = self.models().cleanup_orphans();
        if removed_models > 0 {
            debug!("Removed {removed_models} orphaned rows from the global models table");
        }
        self.prune_empty_tables();

        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(self.doc.to_string().as_bytes())?;
        temp.flush()?;
        temp.persist(&self.path).map_err(|err| Error::Io(err.error))?;
        Ok(())
    }

    pub(crate) fn comfygit_table(&self) -> Option<&Table> {
        self.doc
            .get("tool")?
            .as_table()?
            .get("comfygit")?
            .as_table()
    }

    pub(crate) fn comfygit_table_mut(&mut self) -> &mut Table {
        let tool = self.doc["tool"].or_insert(Item::Table({
            let mut table = Table::new();
            table.set_implicit(true);
            table
        }));
        let comfygit = tool
            .as_table_mut()
            .expect("`tool` is a table")
            .entry("comfygit")
            .or_insert(Item::Table(Table::new()));
        comfygit.as_table_mut().expect("`tool.comfygit` is a table")
    }

    /// Empty tables must not survive a save: no bare section headers.
    fn prune_empty_tables(&mut self) {
        let Some(comfygit) = self
            .doc
            .get_mut("tool")
            .and_then(Item::as_table_mut)
            .and_then(|tool| tool.get_mut("comfygit"))
            .and_then(Item::as_table_mut)
        else {
            return;
        };
        prune_table(comfygit);
    }
}

fn prune_table(table: &mut Table) {
    let empty_keys: Vec<String> = table
        .iter_mut()
        .filter_map(|(key, item)| {
            if let Some(child) = item.as_table_mut() {
                prune_table(child);
                if child.is_empty() {
                    return Some(key.get().to_string());
                }
            } else if item
                .as_inline_table()
                .is_some_and(toml_edit::InlineTable::is_empty)
            {
                return Some(key.get().to_string());
            }
            None
        })
        .collect();
    for key in empty_keys {
        table.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_produces_a_parseable_manifest() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pyproject.toml");
        let store = ManifestStore::init(&path, "my-env", "3.12", "v0.3.60")?;
        assert_eq!(store.python_version(), Some("3.12"));
        assert_eq!(store.comfyui_version(), Some("v0.3.60"));

        let reloaded = ManifestStore::load(&path)?;
        assert_eq!(reloaded.python_version(), Some("3.12"));
        Ok(())
    }

    #[test]
    fn parse_errors_surface() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pyproject.toml");
        fs_err::write(&path, "[project\nname = broken")?;
        assert!(matches!(ManifestStore::load(&path), Err(Error::Parse(_))));
        Ok(())
    }

    #[test]
    fn empty_sections_are_pruned_on_save() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pyproject.toml");
        fs_err::write(
            &path,
            "[project]\nname = \"x\"\n\n[tool.comfygit.nodes]\n\n[tool.comfygit.models]\n",
        )?;
        let mut store = ManifestStore::load(&path)?;
        store.save()?;

        let text = fs_err::read_to_string(&path)?;
        assert!(!text.contains("[tool.comfygit.nodes]"));
        assert!(!text.contains("[tool.comfygit.models]"));
        Ok(())
    }
}
