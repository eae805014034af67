use indoc::indoc;

use crate::common::TestEnv;

const MAPPINGS: &str = indoc! {r#"
    {
      "mappings": {
        "DepthAnything_V2::_": {"package_id": "comfyui_controlnet_aux", "versions": ["1.0.7"]}
      },
      "packages": {
        "comfyui_controlnet_aux": {
          "display_name": "ControlNet Auxiliary Preprocessors",
          "repository": "https://github.com/Fannovel16/comfyui_controlnet_aux"
        }
      }
    }
"#};

#[test]
fn status_aggregates_all_workflows() -> anyhow::Result<()> {
    let mut test = TestEnv::with_mappings(Some(MAPPINGS));
    test.seed_model("aaa111", "checkpoints/sd15_v1.safetensors");

    test.write_workflow(
        "resolved_wf",
        indoc! {r#"
            {
              "nodes": [
                {"id": 4, "type": "CheckpointLoaderSimple",
                 "widgets_values": ["checkpoints/sd15_v1.safetensors"]}
              ]
            }
        "#},
    );
    test.write_workflow(
        "custom_wf",
        indoc! {r#"
            {
              "nodes": [
                {"id": 7, "type": "DepthAnything_V2", "widgets_values": []}
              ]
            }
        "#},
    );

    let status = test.env.status();
    assert_eq!(status.analyzed_workflows.len(), 2);
    assert!(status.errored_workflows.is_empty());
    assert!(status.is_resolved());

    // Both workflows are new (never committed).
    assert_eq!(status.sync_status.new.len(), 2);

    // The custom node resolved through the registry mirror, but the
    // package is not installed yet.
    let custom = status
        .analyzed_workflows
        .iter()
        .find(|workflow| workflow.name == "custom_wf")
        .unwrap();
    assert_eq!(
        custom.uninstalled_nodes,
        vec!["comfyui_controlnet_aux".to_string()]
    );
    Ok(())
}

#[test]
fn one_broken_workflow_does_not_poison_status() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    test.write_workflow("good", r#"{"nodes": []}"#);
    test.write_workflow("broken", "{not json at all");

    let status = test.env.status();
    assert_eq!(status.analyzed_workflows.len(), 1);
    assert_eq!(status.analyzed_workflows[0].name, "good");
    assert_eq!(status.errored_workflows.len(), 1);
    assert_eq!(status.errored_workflows[0].0, "broken");
    Ok(())
}

#[test]
fn repeated_status_hits_the_cache() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    test.write_workflow("wf", r#"{"nodes": []}"#);

    let first = test.env.status();
    assert!(first.is_resolved());

    // Unchanged workflow and manifest: the second pass is answered from
    // the analysis cache (same outcome, no re-parse).
    let second = test.env.status();
    assert_eq!(
        second.analyzed_workflows[0].resolution,
        first.analyzed_workflows[0].resolution
    );
    Ok(())
}

#[test]
fn torch_config_requires_the_backend_pin() -> anyhow::Result<()> {
    let mut test = TestEnv::new();

    // No .pytorch-backend file: the config is refused.
    assert!(test.env.torch_config().is_err());

    test.env.backend_file().write(&"cu128".parse()?)?;
    let config = test.env.torch_config()?;
    assert_eq!(config.indexes[0].url, "https://download.pytorch.org/whl/cu128");
    assert_eq!(
        config.sources.get("torch"),
        Some(&"pytorch-cu128".to_string())
    );

    // The pin never enters version control.
    let gitignore = fs_err::read_to_string(test.env.cec_path().join(".gitignore"))?;
    assert!(gitignore.contains(".pytorch-backend"));
    Ok(())
}
