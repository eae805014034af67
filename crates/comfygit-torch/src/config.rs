use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::{Error, TorchBackend, TorchVersionCache, PYTORCH_CORE_PACKAGES};

/// One backend-specific package index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorchIndex {
    pub name: String,
    pub url: String,
    /// Only packages explicitly mapped to this index may come from it.
    pub explicit: bool,
}

/// The backend-specific slice of the Python configuration: the index to
/// add, which packages must come from it, and exact version constraints
/// when the cache knows them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TorchConfig {
    pub indexes: Vec<TorchIndex>,
    pub sources: BTreeMap<String, String>,
    pub constraints: Vec<String>,
}

impl TorchConfig {
    /// Build the configuration for a backend.
    ///
    /// Version constraints come from the workspace version cache when a
    /// probe has populated it for this exact Python version; otherwise
    /// the config carries the index mapping alone.
    pub fn for_backend(
        backend: &TorchBackend,
        python_version: Option<&str>,
        workspace_path: Option<&Path>,
    ) -> Result<Self, Error> {
        let index = TorchIndex {
            name: backend.index_name(),
            url: backend.index_url(),
            explicit: true,
        };

        let sources: BTreeMap<String, String> = PYTORCH_CORE_PACKAGES
            .iter()
            .map(|package| ((*package).to_string(), index.name.clone()))
            .collect();

        let mut constraints = Vec::new();
        if let (Some(python_version), Some(workspace_path)) = (python_version, workspace_path) {
            let cache = TorchVersionCache::new(workspace_path);
            if let Some(versions) = cache.get_versions(python_version, backend) {
                constraints = versions
                    .iter()
                    .filter(|(package, _)| PYTORCH_CORE_PACKAGES.contains(&package.as_str()))
                    .map(|(package, version)| format!("{package}=={version}"))
                    .collect();
            } else {
                debug!("No cached PyTorch versions for {python_version}+{backend}");
            }
        }

        Ok(Self {
            indexes: vec![index],
            sources,
            constraints,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn config_maps_core_packages_to_the_index() -> anyhow::Result<()> {
        let backend: TorchBackend = "cu128".parse()?;
        let config = TorchConfig::for_backend(&backend, None, None)?;

        assert_eq!(config.indexes.len(), 1);
        assert_eq!(config.indexes[0].name, "pytorch-cu128");
        assert!(config.indexes[0].explicit);
        for package in PYTORCH_CORE_PACKAGES {
            assert_eq!(config.sources.get(*package), Some(&"pytorch-cu128".to_string()));
        }
        assert!(config.constraints.is_empty());
        Ok(())
    }

    #[test]
    fn constraints_come_from_the_version_cache() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let backend: TorchBackend = "cu128".parse()?;
        let cache = TorchVersionCache::new(dir.path());
        cache.set_versions(
            "3.12.11",
            &backend,
            &BTreeMap::from([("torch".to_string(), "2.9.1+cu128".to_string())]),
        )?;

        let config = TorchConfig::for_backend(&backend, Some("3.12.11"), Some(dir.path()))?;
        assert_eq!(config.constraints, vec!["torch==2.9.1+cu128".to_string()]);
        Ok(())
    }
}
