use indoc::indoc;

use crate::common::TestEnv;

#[test]
fn empty_workflow_commits_to_nothing() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    test.write_workflow("empty", r#"{"nodes": []}"#);

    let resolution = test.env.commit_workflow("empty")?;
    assert!(resolution.is_fully_resolved());
    assert!(resolution.nodes_resolved.is_empty());
    assert!(resolution.models_resolved.is_empty());

    // No manifest sections appear for a workflow with no dependencies.
    let manifest = test.manifest_text();
    assert!(!manifest.contains("[tool.comfygit.workflows"));
    assert!(!manifest.contains("[tool.comfygit.models]"));
    Ok(())
}

#[test]
fn builtin_paths_stripped_custom_paths_preserved() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    test.seed_model("aaa111", "checkpoints/sd15_v1.safetensors");
    test.seed_model("bbb222", "depthanything/depth_anything_v2_vits_fp16.safetensors");

    let workflow_path = test.write_workflow(
        "portrait",
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
    );

    test.env.commit_workflow("portrait")?;

    // The builtin loader's widget loses its base directory; the custom
    // node's widget is byte-identical to what the author wrote.
    assert_eq!(
        test.read_widget(&workflow_path, "4", 0),
        "sd15_v1.safetensors"
    );
    assert_eq!(
        test.read_widget(&workflow_path, "12", 0),
        "depth_anything_v2_vits_fp16.safetensors"
    );
    Ok(())
}

#[test]
fn commit_is_idempotent() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    test.seed_model("aaa111", "checkpoints/sd15_v1.safetensors");
    test.write_workflow(
        "portrait",
        indoc! {r#"
            {
              "nodes": [
                {"id": 4, "type": "CheckpointLoaderSimple",
                 "widgets_values": ["checkpoints/sd15_v1.safetensors"]}
              ]
            }
        "#},
    );

    // The first commit may rewrite widget paths in the JSON; from then
    // on the system is at a fixed point.
    let first = test.env.commit_workflow("portrait")?;
    assert!(first.is_fully_resolved());

    let second = test.env.commit_workflow("portrait")?;
    assert!(second.is_fully_resolved());
    let manifest_after_second = test.manifest_text();

    let third = test.env.commit_workflow("portrait")?;
    assert!(third.is_fully_resolved());
    assert_eq!(
        third.models_resolved.len(),
        second.models_resolved.len(),
        "re-committing a resolved workflow must not change the outcome"
    );
    assert_eq!(test.manifest_text(), manifest_after_second);
    Ok(())
}

#[test]
fn committed_models_are_reference_counted() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    test.seed_model("aaa111", "checkpoints/shared.safetensors");

    let body = indoc! {r#"
        {
          "nodes": [
            {"id": 4, "type": "CheckpointLoaderSimple",
             "widgets_values": ["shared.safetensors"]}
          ]
        }
    "#};
    test.write_workflow("one", body);
    test.write_workflow("two", body);
    test.env.commit_workflow("one")?;
    test.env.commit_workflow("two")?;
    test.env.commit_workflow_files()?;

    let manifest = test.manifest_text();
    assert!(manifest.contains("aaa111"));

    // Deleting one workflow keeps the global row alive through the
    // other; deleting both orphans it.
    let workflows = test
        .env
        .comfyui_path()
        .join("user")
        .join("default")
        .join("workflows");
    fs_err::remove_file(workflows.join("one.json"))?;
    fs_err::remove_file(test.env.cec_path().join("workflows").join("one.json"))?;
    test.env.manifest().save()?;
    assert!(test.manifest_text().contains("aaa111"));

    fs_err::remove_file(workflows.join("two.json"))?;
    fs_err::remove_file(test.env.cec_path().join("workflows").join("two.json"))?;
    test.env.manifest().save()?;
    let manifest = test.manifest_text();
    assert!(!manifest.contains("aaa111"));
    assert!(!manifest.contains("[tool.comfygit.models]"));
    Ok(())
}

#[test]
fn manifest_reuse_resolves_without_prompting() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    test.seed_model("aaa111", "vae/qwen_image_vae.safetensors");
    test.write_workflow(
        "video",
        indoc! {r#"
            {
              "nodes": [
                {"id": 39, "type": "VAELoader",
                 "widgets_values": ["qwen_image_vae.safetensors"]}
              ]
            }
        "#},
    );

    test.env.commit_workflow("video")?;

    // A later pass reuses the manifest entry: still resolved, same hash.
    let (_, resolution) = test.env.analyze_and_resolve("video")?;
    assert!(resolution.is_fully_resolved());
    let resolved = &resolution.models_resolved[0];
    assert_eq!(
        resolved.resolved.as_ref().map(|model| model.hash.as_str()),
        Some("aaa111")
    );
    Ok(())
}
