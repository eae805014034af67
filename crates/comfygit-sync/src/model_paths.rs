use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::Error;

const CONFIG_FILE: &str = "extra_model_paths.yaml";

/// Category directories every environment gets pointed at, whether or
/// not they exist yet.
const STANDARD_DIRECTORIES: &[&str] = &[
    "checkpoints",
    "clip_vision",
    "controlnet",
    "diffusion_models",
    "embeddings",
    "gligen",
    "loras",
    "style_models",
    "text_encoders",
    "upscale_models",
    "vae",
];

/// Result of one model-paths sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelPathsStatus {
    pub updated: bool,
    pub total_directories: usize,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
struct ConfigFile {
    comfygit: BTreeMap<String, String>,
}

/// Point the host at the shared models root.
///
/// Writes `extra_model_paths.yaml` with a `base_path` plus one mapping
/// per category: the standard set, and any additional top-level
/// directory discovered under the root. The file is rewritten only when
/// its content would change.
pub fn sync_model_paths(
    comfyui_path: &Path,
    global_models_path: &Path,
) -> Result<ModelPathsStatus, Error> {
    let config_path = comfyui_path.join(CONFIG_FILE);

    let mut directories: Vec<String> = STANDARD_DIRECTORIES
        .iter()
        .map(ToString::to_string)
        .collect();
    for discovered in discover_directories(global_models_path) {
        if !directories.contains(&discovered) {
            directories.push(discovered);
        }
    }
    directories.sort();

    let mut mapping = BTreeMap::new();
    mapping.insert(
        "base_path".to_string(),
        global_models_path.to_string_lossy().into_owned(),
    );
    for directory in &directories {
        mapping.insert(directory.clone(), directory.clone());
    }
    let desired = ConfigFile { comfygit: mapping };

    let existing: Option<ConfigFile> = fs_err::read_to_string(&config_path)
        .ok()
        .and_then(|text| serde_yaml::from_str(&text).ok());

    let (added, removed) = diff_directories(existing.as_ref(), &directories);
    if existing.as_ref() == Some(&desired) {
        debug!("Model paths already configured; no changes needed");
        return Ok(ModelPathsStatus {
            updated: false,
            total_directories: directories.len(),
            added,
            removed,
        });
    }

    let body = serde_yaml::to_string(&desired)?;
    fs_err::write(&config_path, body)?;
    if !added.is_empty() {
        info!("Added model directories: {}", added.join(", "));
    }
    if !removed.is_empty() {
        info!("Removed model directories: {}", removed.join(", "));
    }
    Ok(ModelPathsStatus {
        updated: true,
        total_directories: directories.len(),
        added,
        removed,
    })
}

fn discover_directories(global_models_path: &Path) -> Vec<String> {
    let Ok(entries) = fs_err::read_dir(global_models_path) else {
        return Vec::new();
    };
    let mut discovered: Vec<String> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect();
    discovered.sort();
    discovered
}

fn diff_directories(
    existing: Option<&ConfigFile>,
    desired: &[String],
) -> (Vec<String>, Vec<String>) {
    let current: Vec<String> = existing
        .map(|config| {
            config
                .comfygit
                .keys()
                .filter(|key| key.as_str() != "base_path")
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    let added = desired
        .iter()
        .filter(|directory| !current.contains(directory))
        .cloned()
        .collect();
    let removed = current
        .iter()
        .filter(|directory| !desired.contains(directory))
        .cloned()
        .collect();
    (added, removed)
}
