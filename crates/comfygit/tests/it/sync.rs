use comfygit::types::{NodeInstall, NodeSourceKind};
use comfygit::NodeSyncPolicy;

use crate::common::TestEnv;

fn dev_install(name: &str) -> NodeInstall {
    NodeInstall {
        name: name.to_string(),
        version: Some("dev".to_string()),
        source: NodeSourceKind::Development,
        registry_id: None,
        repository: None,
        download_url: None,
        branch: None,
        pinned_commit: None,
        dependency_sources: vec![],
    }
}

#[test]
fn checkout_leaves_dev_folders_intact() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    let custom_nodes = test.env.custom_nodes_path();
    let dev_dir = custom_nodes.join("my-wip-node");
    fs_err::create_dir_all(&dev_dir)?;
    fs_err::write(dev_dir.join("nodes.py"), "NODE_CLASS_MAPPINGS = {}")?;
    fs_err::write(dev_dir.join("uncommitted.py"), "# in progress")?;

    // The manifest does not list the node; a checkout-style sync runs.
    let (result, _) = test.env.sync(NodeSyncPolicy {
        remove_extra_nodes: true,
        preserve_dev_work: true,
    });

    assert!(result.success);
    assert!(dev_dir.exists(), "dev folder must not be renamed or deleted");
    assert!(dev_dir.join("uncommitted.py").exists());
    assert!(!custom_nodes.join("my-wip-node.disabled").exists());
    Ok(())
}

#[test]
fn repair_removes_extra_clones_only_when_asked() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    let custom_nodes = test.env.custom_nodes_path();
    let clone = custom_nodes.join("ComfyUI-VideoHelperSuite");
    fs_err::create_dir_all(clone.join(".git"))?;
    fs_err::write(clone.join(".git").join("config"), "[core]\n")?;

    // Conservative repair warns and keeps the clone.
    let (result, _) = test.env.sync(NodeSyncPolicy::default());
    assert!(result.success);
    assert!(clone.exists());
    assert_eq!(result.nodes_kept, vec!["ComfyUI-VideoHelperSuite"]);

    // Aggressive repair deletes it.
    let (result, _) = test.env.sync(NodeSyncPolicy {
        remove_extra_nodes: true,
        preserve_dev_work: false,
    });
    assert!(result.success);
    assert!(!clone.exists());
    assert_eq!(result.nodes_removed, vec!["ComfyUI-VideoHelperSuite"]);
    Ok(())
}

#[test]
fn missing_dev_nodes_never_fail_the_sync() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    test.env
        .manifest()
        .nodes()
        .add("gone-dev-node", &dev_install("gone-dev-node"))?;

    let (result, planned) = test.env.sync(NodeSyncPolicy::default());
    assert!(result.success);
    assert_eq!(result.dev_nodes_missing, vec!["gone-dev-node"]);
    assert!(planned.is_empty());
    Ok(())
}

#[test]
fn sync_configures_model_paths_idempotently() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    fs_err::create_dir_all(test.models_root().join("checkpoints"))?;

    let (result, _) = test.env.sync(NodeSyncPolicy::default());
    assert!(result.model_paths_configured);

    let config_path = test.env.comfyui_path().join("extra_model_paths.yaml");
    let first = fs_err::read_to_string(&config_path)?;
    assert!(first.contains("base_path"));
    assert!(first.contains("checkpoints"));

    let (result, _) = test.env.sync(NodeSyncPolicy::default());
    assert!(result.model_paths_configured);
    assert_eq!(fs_err::read_to_string(&config_path)?, first);
    Ok(())
}

#[test]
fn manifest_nodes_without_directories_are_planned() -> anyhow::Result<()> {
    let mut test = TestEnv::new();
    test.env.manifest().nodes().add(
        "comfyui_controlnet_aux",
        &NodeInstall {
            name: "comfyui_controlnet_aux".to_string(),
            version: Some("1.0.7".to_string()),
            source: NodeSourceKind::Registry,
            registry_id: Some("comfyui_controlnet_aux".to_string()),
            repository: None,
            download_url: None,
            branch: None,
            pinned_commit: None,
            dependency_sources: vec![],
        },
    )?;

    let (result, planned) = test.env.sync(NodeSyncPolicy::default());
    assert!(result.success);
    assert_eq!(planned.len(), 1);
    assert_eq!(planned[0].package_id, "comfyui_controlnet_aux");
    // Execution is the caller's job; nothing is recorded as installed.
    assert!(result.nodes_installed.is_empty());
    Ok(())
}
