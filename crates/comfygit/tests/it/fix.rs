use std::cell::Cell;

use indoc::indoc;

use comfygit::types::{
    ModelMatchType, ResolvedModel, ResolvedNodePackage, WorkflowNodeWidgetRef,
};
use comfygit::{ModelResolutionContext, ModelResolutionStrategy};

use crate::common::TestEnv;

/// A strategy that counts its prompts and returns a fixed answer.
struct CountingStrategy<F> {
    calls: Cell<usize>,
    answer: F,
}

impl<F> CountingStrategy<F> {
    fn new(answer: F) -> Self {
        Self {
            calls: Cell::new(0),
            answer,
        }
    }
}

impl<F> ModelResolutionStrategy for CountingStrategy<F>
where
    F: Fn(&WorkflowNodeWidgetRef) -> Option<ResolvedModel>,
{
    fn resolve_model(
        &self,
        reference: &WorkflowNodeWidgetRef,
        _candidates: &[ResolvedModel],
        _context: &ModelResolutionContext,
    ) -> Option<ResolvedModel> {
        self.calls.set(self.calls.get() + 1);
        (self.answer)(reference)
    }
}

fn optional_unresolved(reference: &WorkflowNodeWidgetRef) -> ResolvedModel {
    ResolvedModel {
        reference: reference.clone(),
        resolved: None,
        source: None,
        is_optional: true,
        match_type: ModelMatchType::UserConfirmed,
        confidence: 1.0,
        target_path: None,
        needs_path_sync: false,
        category_mismatch: None,
    }
}

#[test]
fn optional_model_lands_in_exactly_one_section() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    test.write_workflow(
        "video",
        indoc! {r#"
            {
              "nodes": [
                {"id": 9, "type": "RIFE_VFI", "widgets_values": ["rife49.pth"]}
              ]
            }
        "#},
    );

    // The model is nowhere in the index; the user marks it optional.
    let strategy = CountingStrategy::new(|reference: &WorkflowNodeWidgetRef| {
        Some(optional_unresolved(reference))
    });
    let result = test.env.fix_workflow("video", None, Some(&strategy))?;
    assert!(result.models_unresolved.is_empty());

    // Commit after the fix; the entry must not duplicate and must stay
    // optional.
    test.env.commit_workflow("video")?;

    let entries = test.env.manifest().workflows().get_workflow_models("video");
    assert_eq!(entries.len(), 1, "one entry for the optional model");
    assert_eq!(entries[0].filename, "rife49.pth");
    assert_eq!(entries[0].criticality, comfygit::types::Criticality::Optional);
    assert_eq!(entries[0].status, comfygit::types::ModelStatus::Unresolved);
    assert!(entries[0].hash.is_none());
    // No hash: nothing enters the global models table.
    let manifest = test.manifest_text();
    assert!(!manifest.contains("[tool.comfygit.models]"));
    Ok(())
}

#[test]
fn dedup_group_is_prompted_once_and_written_together() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    test.seed_model("aaa111", "vae/qwen_image_vae.safetensors");

    let workflow_path = test.write_workflow(
        "video",
        indoc! {r#"
            {
              "nodes": [
                {"id": 39, "type": "VAELoader", "widgets_values": ["qwen_vae_v2.safetensors"]},
                {"id": 337, "type": "VAELoader", "widgets_values": ["qwen_vae_v2.safetensors"]}
              ]
            }
        "#},
    );

    // Both nodes reference the same missing file; the user resolves it
    // to the indexed VAE once.
    let resolved_model = comfygit::types::ModelWithLocation {
        hash: "aaa111".to_string(),
        file_size: 1_000_000,
        relative_path: "vae/qwen_image_vae.safetensors".to_string(),
        filename: "qwen_image_vae.safetensors".to_string(),
        mtime_ns: 0,
        last_seen: 0,
        blake3_hash: None,
        sha256_hash: None,
    };
    let strategy = CountingStrategy::new(move |reference: &WorkflowNodeWidgetRef| {
        Some(ResolvedModel {
            reference: reference.clone(),
            resolved: Some(resolved_model.clone()),
            source: None,
            is_optional: false,
            match_type: ModelMatchType::UserConfirmed,
            confidence: 1.0,
            target_path: None,
            needs_path_sync: true,
            category_mismatch: None,
        })
    });

    let result = test.env.fix_workflow("video", None, Some(&strategy))?;

    // One prompt for the whole group.
    assert_eq!(strategy.calls.get(), 1);
    assert!(result.models_unresolved.is_empty());

    // One manifest entry carrying both references.
    let entries = test.env.manifest().workflows().get_workflow_models("video");
    assert_eq!(entries.len(), 1);
    let node_ids: Vec<&str> = entries[0]
        .nodes
        .iter()
        .map(|reference| reference.node_id.as_str())
        .collect();
    assert_eq!(node_ids, vec!["39", "337"]);

    // Both JSON widgets were updated to the same stripped path.
    assert_eq!(
        test.read_widget(&workflow_path, "39", 0),
        "qwen_image_vae.safetensors"
    );
    assert_eq!(
        test.read_widget(&workflow_path, "337", 0),
        "qwen_image_vae.safetensors"
    );
    Ok(())
}

#[test]
fn download_intent_survives_recommit() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    test.write_workflow(
        "video",
        indoc! {r#"
            {
              "nodes": [
                {"id": 9, "type": "UpscaleModelLoader", "widgets_values": ["rife49.pth"]}
              ]
            }
        "#},
    );

    // The user records where the missing model should come from.
    let strategy = CountingStrategy::new(|reference: &WorkflowNodeWidgetRef| {
        Some(ResolvedModel {
            reference: reference.clone(),
            resolved: None,
            source: Some("https://example.com/rife49.pth".to_string()),
            is_optional: false,
            match_type: ModelMatchType::DownloadIntent,
            confidence: 1.0,
            target_path: Some("upscale_models/rife49.pth".to_string()),
            needs_path_sync: false,
            category_mismatch: None,
        })
    });
    test.env.fix_workflow("video", None, Some(&strategy))?;

    // A later commit re-resolves and keeps the intent.
    test.env.commit_workflow("video")?;
    let entries = test.env.manifest().workflows().get_workflow_models("video");
    assert_eq!(entries.len(), 1);
    assert!(entries[0].is_download_intent());
    assert_eq!(
        entries[0].sources,
        vec!["https://example.com/rife49.pth".to_string()]
    );
    assert_eq!(
        entries[0].relative_path.as_deref(),
        Some("upscale_models/rife49.pth")
    );
    Ok(())
}

#[test]
fn node_skip_decision_suppresses_future_prompts() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    test.write_workflow(
        "video",
        indoc! {r#"
            {
              "nodes": [
                {"id": 2, "type": "SomeDebugNode", "widgets_values": []}
              ]
            }
        "#},
    );

    struct OptionalNodeStrategy;
    impl comfygit::NodeResolutionStrategy for OptionalNodeStrategy {
        fn resolve_unknown_node(
            &self,
            node_type: &str,
            _candidates: &[ResolvedNodePackage],
            _context: &comfygit::NodeResolutionContext,
        ) -> Option<ResolvedNodePackage> {
            Some(ResolvedNodePackage {
                package_id: String::new(),
                package: None,
                node_type: node_type.to_string(),
                versions: vec![],
                match_type: comfygit::types::NodeMatchType::Optional,
                confidence: 1.0,
            })
        }
    }

    test.env
        .fix_workflow("video", Some(&OptionalNodeStrategy), None)?;

    // The skip is recorded; a fresh resolve no longer reports the type.
    let manifest = test.manifest_text();
    assert!(manifest.contains("SomeDebugNode = false"));
    let (_, resolution) = test.env.analyze_and_resolve("video")?;
    assert!(resolution.nodes_unresolved.is_empty());
    assert!(resolution.is_fully_resolved());
    Ok(())
}
