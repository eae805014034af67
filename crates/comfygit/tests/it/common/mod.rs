use std::path::{Path, PathBuf};

use comfygit::{Environment, EnvironmentOptions};
use comfygit::types::ModelWithLocation;

/// A throwaway environment rooted in a temp directory, with its own
/// model index, analysis cache, and (optionally) a node-mapping file.
pub struct TestEnv {
    pub dir: tempfile::TempDir,
    pub env: Environment,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_mappings(None)
    }

    pub fn with_mappings(mappings_json: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("env");
        let models_root = dir.path().join("models");
        fs_err::create_dir_all(&models_root).unwrap();

        let node_mappings_path = mappings_json.map(|json| {
            let path = dir.path().join("node-mappings.json");
            fs_err::write(&path, json).unwrap();
            path
        });

        let env = Environment::open(EnvironmentOptions {
            name: "test-env".to_string(),
            root,
            models_root,
            model_index_db: dir.path().join("models.db"),
            analysis_cache_db: dir.path().join("workflows.db"),
            node_mappings_path,
        })
        .unwrap();

        Self { dir, env }
    }

    pub fn models_root(&self) -> PathBuf {
        self.dir.path().join("models")
    }

    /// Write a workflow into the host's workflow directory.
    pub fn write_workflow(&self, name: &str, body: &str) -> PathBuf {
        let workflows = self
            .env
            .comfyui_path()
            .join("user")
            .join("default")
            .join("workflows");
        fs_err::create_dir_all(&workflows).unwrap();
        let path = workflows.join(format!("{name}.json"));
        fs_err::write(&path, body).unwrap();
        path
    }

    /// Register a model in the index (no file on disk needed).
    pub fn seed_model(&mut self, hash: &str, relative_path: &str) {
        self.env
            .repository()
            .upsert(&ModelWithLocation {
                hash: hash.to_string(),
                file_size: 1_000_000,
                relative_path: relative_path.to_string(),
                filename: relative_path.rsplit('/').next().unwrap().to_string(),
                mtime_ns: 1_700_000_000_000_000_000,
                last_seen: 1_700_000_000,
                blake3_hash: None,
                sha256_hash: None,
            })
            .unwrap();
    }

    pub fn manifest_text(&mut self) -> String {
        fs_err::read_to_string(self.env.manifest().path()).unwrap()
    }

    pub fn read_widget(&self, workflow_path: &Path, node_id: &str, index: usize) -> String {
        let body = fs_err::read_to_string(workflow_path).unwrap();
        let raw: serde_json::Value = serde_json::from_str(&body).unwrap();
        let nodes = raw["nodes"].as_array().unwrap();
        let node = nodes
            .iter()
            .find(|node| node["id"].to_string().trim_matches('"') == node_id)
            .unwrap();
        node["widgets_values"][index].as_str().unwrap().to_string()
    }
}
