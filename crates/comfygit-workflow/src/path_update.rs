use std::path::Path;

use tracing::{debug, info};

use comfygit_types::ResolutionResult;

use crate::config::ModelPathConfig;
use crate::document::WorkflowDocument;
use crate::Error;

/// How many widget values a batch path update rewrote vs left alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathUpdateCounts {
    pub updated: usize,
    pub preserved: usize,
}

impl PathUpdateCounts {
    pub fn changed(self) -> bool {
        self.updated > 0
    }
}

/// Rewrite resolved model paths into the workflow JSON, in one batch.
///
/// Only builtin loader nodes are touched: the host prepends their base
/// directory, so the widget gets the stripped path. Custom nodes manage
/// their own paths and their widget values are preserved exactly as
/// authored. The file is saved only if something actually changed.
pub fn update_workflow_model_paths(
    workflow_path: &Path,
    resolution: &ResolutionResult,
    config: &ModelPathConfig,
) -> Result<PathUpdateCounts, Error> {
    let mut document = WorkflowDocument::load(workflow_path)?;
    let mut counts = PathUpdateCounts::default();

    for resolved in &resolution.models_resolved {
        let reference = &resolved.reference;
        // Nothing to write for optional-unresolved entries and intents.
        let Some(model) = &resolved.resolved else {
            continue;
        };

        if !config.is_model_loader_node(&reference.node_type) {
            debug!(
                "Preserving widget value for custom node '{}' (node {})",
                reference.node_type, reference.node_id
            );
            counts.preserved += 1;
            continue;
        }

        let display_path = config.strip_base_directory(&reference.node_type, &model.relative_path);
        let current = document
            .node(&reference.node_id)
            .and_then(|node| node.widgets_values.get(reference.widget_index))
            .and_then(|widget| widget.as_text())
            .map(ToString::to_string);
        if current.as_deref() == Some(display_path.as_str()) {
            continue;
        }
        if document.set_widget_value(&reference.node_id, reference.widget_index, &display_path) {
            debug!(
                "Updated node {} widget {}: {:?} -> {display_path}",
                reference.node_id, reference.widget_index, current
            );
            counts.updated += 1;
        }
    }

    if counts.updated > 0 {
        document.save(workflow_path)?;
        info!(
            "Updated workflow JSON at {} ({} builtin widgets updated, {} custom preserved)",
            workflow_path.display(),
            counts.updated,
            counts.preserved
        );
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use comfygit_types::{
        ModelMatchType, ModelWithLocation, ResolvedModel, WorkflowNodeWidgetRef,
    };

    use super::*;

    fn resolved(
        node_id: &str,
        node_type: &str,
        widget_value: &str,
        relative_path: &str,
    ) -> ResolvedModel {
        ResolvedModel {
            reference: WorkflowNodeWidgetRef {
                node_id: node_id.to_string(),
                node_type: node_type.to_string(),
                widget_index: 0,
                widget_value: widget_value.to_string(),
            },
            resolved: Some(ModelWithLocation {
                hash: "aaa111".to_string(),
                file_size: 10,
                relative_path: relative_path.to_string(),
                filename: relative_path.rsplit('/').next().unwrap().to_string(),
                mtime_ns: 0,
                last_seen: 0,
                blake3_hash: None,
                sha256_hash: None,
            }),
            source: None,
            is_optional: false,
            match_type: ModelMatchType::Exact,
            confidence: 1.0,
            target_path: None,
            needs_path_sync: true,
            category_mismatch: None,
        }
    }

    #[test]
    fn builtin_stripped_custom_preserved() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("wf.json");
        fs_err::write(
            &path,
            indoc! {r#"
                {
                  "nodes": [
                    {"id": 4, "type": "CheckpointLoaderSimple",
                     "widgets_values": ["checkpoints/sd15_v1.safetensors"]},
                    {"id": 12, "type": "DownloadAndLoadDepthAnythingV2Model",
                     "widgets_values": ["depth_anything_v2_vits_fp16.safetensors"]}
                  ]
                }
            "#},
        )?;

        let mut resolution = ResolutionResult::new("wf");
        resolution.models_resolved.push(resolved(
            "4",
            "CheckpointLoaderSimple",
            "checkpoints/sd15_v1.safetensors",
            "checkpoints/sd15_v1.safetensors",
        ));
        resolution.models_resolved.push(resolved(
            "12",
            "DownloadAndLoadDepthAnythingV2Model",
            "depth_anything_v2_vits_fp16.safetensors",
            "depth_anything/depth_anything_v2_vits_fp16.safetensors",
        ));

        let counts =
            update_workflow_model_paths(&path, &resolution, &ModelPathConfig::default())?;
        assert_eq!(counts.updated, 1);
        assert_eq!(counts.preserved, 1);

        let document = WorkflowDocument::load(&path)?;
        assert_eq!(
            document.node("4").unwrap().widgets_values[0].as_text(),
            Some("sd15_v1.safetensors")
        );
        // The custom node widget is untouched.
        assert_eq!(
            document.node("12").unwrap().widgets_values[0].as_text(),
            Some("depth_anything_v2_vits_fp16.safetensors")
        );
        Ok(())
    }

    #[test]
    fn no_changes_means_no_rewrite() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("wf.json");
        fs_err::write(
            &path,
            r#"{"nodes": [{"id": 4, "type": "CheckpointLoaderSimple", "widgets_values": ["sd15.safetensors"]}]}"#,
        )?;
        let before = fs_err::metadata(&path)?.modified()?;

        let mut resolution = ResolutionResult::new("wf");
        resolution.models_resolved.push(resolved(
            "4",
            "CheckpointLoaderSimple",
            "sd15.safetensors",
            "checkpoints/sd15.safetensors",
        ));

        let counts =
            update_workflow_model_paths(&path, &resolution, &ModelPathConfig::default())?;
        assert_eq!(counts.updated, 0);
        assert_eq!(fs_err::metadata(&path)?.modified()?, before);
        Ok(())
    }
}
