use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use toml_edit::{DocumentMut, Item, Table};
use tracing::{debug, warn};

use crate::{Error, TorchBackend};

const CACHE_DIR: &str = "comfygit_cache";
const CACHE_FILE: &str = "pytorch-cache.toml";

/// Workspace-level cache of exact PyTorch package versions, keyed by
/// exact Python version + backend.
///
/// Auto-generated and gitignored. Top-level tables are
/// `py<major>_<minor>_<patch>`; each holds one table per backend with the
/// exact `torch`/`torchvision`/`torchaudio` pins and a `discovered`
/// timestamp.
#[derive(Debug)]
pub struct TorchVersionCache {
    cache_file: PathBuf,
}

impl TorchVersionCache {
    pub fn new(workspace_path: &Path) -> Self {
        Self {
            cache_file: workspace_path.join(CACHE_DIR).join(CACHE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.cache_file
    }

    /// Cached versions for a Python + backend combination, without the
    /// `discovered` stamp.
    pub fn get_versions(
        &self,
        python_version: &str,
        backend: &TorchBackend,
    ) -> Option<BTreeMap<String, String>> {
        let doc = self.load().ok()?;
        let section = doc.get(&section_key(python_version))?.as_table()?;
        let entry = section.get(backend.as_str())?.as_table()?;

        let versions: BTreeMap<String, String> = entry
            .iter()
            .filter(|(key, _)| *key != "discovered")
            .filter_map(|(key, item)| Some((key.to_string(), item.as_str()?.to_string())))
            .collect();
        (!versions.is_empty()).then_some(versions)
    }

    /// Store probed versions for a Python + backend combination.
    pub fn set_versions(
        &self,
        python_version: &str,
        backend: &TorchBackend,
        versions: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let mut doc = self.load().unwrap_or_default();

        let section = doc
            .entry(&section_key(python_version))
            .or_insert(Item::Table(Table::new()))
            .as_table_mut()
            .expect("python section is a table");
        let mut entry = Table::new();
        for (package, version) in versions {
            entry[package] = toml_edit::value(version);
        }
        entry["discovered"] = toml_edit::value(jiff::Timestamp::now().to_string());
        section.insert(backend.as_str(), Item::Table(entry));

        self.store(&doc)?;
        debug!("Cached PyTorch versions for {python_version}+{backend}");
        Ok(())
    }

    /// Drop every cached entry for one backend; empty Python sections go
    /// with it.
    pub fn clear_backend(&self, backend: &TorchBackend) -> Result<(), Error> {
        let Ok(mut doc) = self.load() else {
            return Ok(());
        };
        let sections: Vec<String> = doc
            .iter()
            .map(|(key, _)| key.to_string())
            .collect();
        let mut cleared = false;
        for key in sections {
            if let Some(section) = doc.get_mut(&key).and_then(Item::as_table_mut) {
                if section.remove(backend.as_str()).is_some() {
                    cleared = true;
                }
                if section.is_empty() {
                    doc.remove(&key);
                }
            }
        }
        if cleared {
            self.store(&doc)?;
        }
        Ok(())
    }

    pub fn clear_all(&self) -> Result<(), Error> {
        if self.cache_file.exists() {
            fs_err::remove_file(&self.cache_file)?;
        }
        Ok(())
    }

    fn load(&self) -> Result<DocumentMut, Error> {
        let text = fs_err::read_to_string(&self.cache_file)?;
        text.parse().map_err(|err: toml_edit::TomlError| {
            warn!("Discarding corrupt PyTorch version cache: {err}");
            Error::CacheParse(err)
        })
    }

    fn store(&self, doc: &DocumentMut) -> Result<(), Error> {
        if let Some(parent) = self.cache_file.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let body = format!("# PyTorch version cache - auto-generated, do not edit\n\n{doc}");
        fs_err::write(&self.cache_file, body)?;
        Ok(())
    }
}

/// `3.12.11` -> `py3_12_11`
fn section_key(python_version: &str) -> String {
    format!("py{}", python_version.replace('.', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn versions() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("torch".to_string(), "2.9.1+cu128".to_string()),
            ("torchvision".to_string(), "0.24.1+cu128".to_string()),
            ("torchaudio".to_string(), "2.9.1+cu128".to_string()),
        ])
    }

    #[test]
    fn set_then_get_roundtrips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = TorchVersionCache::new(dir.path());
        let backend: TorchBackend = "cu128".parse()?;

        assert_eq!(cache.get_versions("3.12.11", &backend), None);
        cache.set_versions("3.12.11", &backend, &versions())?;
        assert_eq!(cache.get_versions("3.12.11", &backend), Some(versions()));

        // The discovered stamp exists on disk but is not returned.
        let text = fs_err::read_to_string(cache.path())?;
        assert!(text.contains("[py3_12_11.cu128]"));
        assert!(text.contains("discovered"));
        Ok(())
    }

    #[test]
    fn clear_backend_removes_empty_sections() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = TorchVersionCache::new(dir.path());
        let cuda: TorchBackend = "cu128".parse()?;
        let cpu: TorchBackend = "cpu".parse()?;
        cache.set_versions("3.12.11", &cuda, &versions())?;
        cache.set_versions("3.12.11", &cpu, &versions())?;

        cache.clear_backend(&cuda)?;
        assert_eq!(cache.get_versions("3.12.11", &cuda), None);
        assert!(cache.get_versions("3.12.11", &cpu).is_some());

        cache.clear_backend(&cpu)?;
        let text = fs_err::read_to_string(cache.path())?;
        assert!(!text.contains("py3_12_11"));
        Ok(())
    }
}
