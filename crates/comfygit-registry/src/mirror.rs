use std::path::Path;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::debug;

use comfygit_types::RegistryPackage;

use crate::github::normalize_github_url;
use crate::Error;

/// One signature-index entry: which package provides the node, and which
/// of its versions are known to.
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureMapping {
    pub package_id: String,
    #[serde(default)]
    pub versions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryData {
    #[serde(default)]
    mappings: IndexMap<String, SignatureMapping>,
    #[serde(default)]
    packages: FxHashMap<String, RegistryPackage>,
}

/// Read-only in-memory view of the global node-type → package mapping.
///
/// Loaded once from a prepared JSON data file; updates to that file are
/// produced out-of-band, the mirror never writes.
#[derive(Debug, Default)]
pub struct RegistryMirror {
    packages: FxHashMap<String, RegistryPackage>,
    mappings: IndexMap<String, SignatureMapping>,
    github_to_registry: FxHashMap<String, String>,
}

impl RegistryMirror {
    /// Load the mirror from a prepared mapping data file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let bytes = fs_err::read(path.as_ref())?;
        let data: RegistryData = serde_json::from_slice(&bytes)?;
        Ok(Self::from_data(data))
    }

    /// Build a mirror directly from parts (test fixtures).
    pub fn from_parts(
        packages: impl IntoIterator<Item = RegistryPackage>,
        mappings: impl IntoIterator<Item = (String, SignatureMapping)>,
    ) -> Self {
        Self::from_data(RegistryData {
            mappings: mappings.into_iter().collect(),
            packages: packages
                .into_iter()
                .map(|package| (package.id.clone(), package))
                .collect(),
        })
    }

    fn from_data(data: RegistryData) -> Self {
        let mut packages = data.packages;
        // The data file keys packages by id; the value may not repeat it.
        for (id, package) in &mut packages {
            if package.id.is_empty() {
                package.id.clone_from(id);
            }
        }

        let mut github_to_registry = FxHashMap::default();
        for (id, package) in &packages {
            if let Some(repository) = &package.repository {
                let normalized = normalize_github_url(repository);
                if !normalized.is_empty() {
                    github_to_registry.insert(normalized, id.clone());
                }
            }
        }

        debug!(
            "Loaded node registry mirror: {} signatures from {} packages, {} GitHub URLs",
            data.mappings.len(),
            packages.len(),
            github_to_registry.len()
        );

        Self {
            packages,
            mappings: data.mappings,
            github_to_registry,
        }
    }

    pub fn package(&self, package_id: &str) -> Option<&RegistryPackage> {
        self.packages.get(package_id)
    }

    pub fn packages(&self) -> impl Iterator<Item = (&String, &RegistryPackage)> {
        self.packages.iter()
    }

    /// Exact lookup in the signature index (`Type::signature` or
    /// `Type::_` keys).
    pub fn signature_lookup(&self, key: &str) -> Option<&SignatureMapping> {
        self.mappings.get(key)
    }

    pub fn mappings(&self) -> impl Iterator<Item = (&String, &SignatureMapping)> {
        self.mappings.iter()
    }

    /// Resolve a GitHub URL (any common form) to its registry package.
    pub fn resolve_github_url(&self, url: &str) -> Option<&RegistryPackage> {
        let normalized = normalize_github_url(url);
        self.github_to_registry
            .get(&normalized)
            .and_then(|id| self.packages.get(id))
    }

    pub fn github_url_for_package(&self, package_id: &str) -> Option<&str> {
        self.packages
            .get(package_id)?
            .repository
            .as_deref()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;

    #[test]
    fn load_from_data_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("node-mappings.json");
        fs_err::write(
            &path,
            indoc! {r#"
                {
                  "version": "3",
                  "mappings": {
                    "DepthAnything_V2::image,model": {"package_id": "comfyui_controlnet_aux", "versions": ["1.0.7"]},
                    "DepthAnything_V2::_": {"package_id": "comfyui_controlnet_aux", "versions": []}
                  },
                  "packages": {
                    "comfyui_controlnet_aux": {
                      "display_name": "ControlNet Auxiliary Preprocessors",
                      "repository": "https://github.com/Fannovel16/comfyui_controlnet_aux.git"
                    }
                  }
                }
            "#},
        )?;

        let mirror = RegistryMirror::load(&path)?;
        let package = mirror.package("comfyui_controlnet_aux").unwrap();
        assert_eq!(package.id, "comfyui_controlnet_aux");

        let mapping = mirror
            .signature_lookup("DepthAnything_V2::image,model")
            .unwrap();
        assert_eq!(mapping.package_id, "comfyui_controlnet_aux");
        assert_eq!(mapping.versions, vec!["1.0.7".to_string()]);
        Ok(())
    }

    #[test]
    fn github_urls_resolve_in_any_form() {
        let mirror = RegistryMirror::from_parts(
            [RegistryPackage {
                id: "comfyui_controlnet_aux".to_string(),
                repository: Some(
                    "https://github.com/Fannovel16/comfyui_controlnet_aux.git".to_string(),
                ),
                ..RegistryPackage::default()
            }],
            [],
        );

        for url in [
            "https://github.com/Fannovel16/comfyui_controlnet_aux",
            "https://github.com/Fannovel16/comfyui_controlnet_aux.git",
            "git@github.com:Fannovel16/comfyui_controlnet_aux.git",
            "ssh://git@github.com/Fannovel16/comfyui_controlnet_aux",
        ] {
            let package = mirror.resolve_github_url(url);
            assert_eq!(
                package.map(|package| package.id.as_str()),
                Some("comfyui_controlnet_aux"),
                "failed for {url}"
            );
        }
        assert!(mirror
            .resolve_github_url("https://github.com/other/repo")
            .is_none());
    }
}
