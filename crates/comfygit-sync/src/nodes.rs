use std::path::Path;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use comfygit_types::{NodeInstall, SyncResult};

use crate::Error;

/// Infrastructure nodes the host itself manages. Never installed,
/// reported, or removed by reconciliation.
pub const SYSTEM_CUSTOM_NODES: &[&str] = &["comfygit-manager"];

/// How to treat nodes on disk that the manifest does not list.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeSyncPolicy {
    /// Delete extra registry/git clones instead of warning about them.
    pub remove_extra_nodes: bool,
    /// Checkout/rollback mode: directories that look like local dev work
    /// are skipped entirely, so a manifest swap never clobbers
    /// in-progress changes. Repair mode leaves this off and renames such
    /// directories aside instead.
    pub preserve_dev_work: bool,
}

/// A node the manifest lists but the filesystem lacks. Installation is
/// the caller's job (registry download or git clone); reconciliation
/// only plans it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedInstall {
    pub package_id: String,
    pub install: NodeInstall,
}

/// Reconcile the custom-nodes directory against the manifest.
///
/// Three rules keep local work safe:
/// - an extra directory without `.git` is treated as in-progress dev
///   work: renamed aside to `<name>.disabled` (with a timestamped backup
///   of any earlier `.disabled`), never deleted;
/// - an extra git clone is deleted only under
///   `policy.remove_extra_nodes`, otherwise kept with a warning;
/// - system nodes and tracked dev nodes are never touched. A tracked dev
///   node whose directory is missing is reported, not fatal.
pub fn reconcile_nodes(
    manifest_nodes: &IndexMap<String, NodeInstall>,
    custom_nodes_path: &Path,
    policy: NodeSyncPolicy,
    result: &mut SyncResult,
) -> Result<Vec<PlannedInstall>, Error> {
    fs_err::create_dir_all(custom_nodes_path)?;
    let mut planned = Vec::new();

    // Manifest side: plan installs for missing non-dev nodes, report
    // missing dev directories.
    for (package_id, install) in manifest_nodes {
        if SYSTEM_CUSTOM_NODES.contains(&install.name.as_str()) {
            continue;
        }
        let node_dir = custom_nodes_path.join(&install.name);
        if node_dir.is_dir() {
            continue;
        }
        if install.is_dev() {
            warn!("Tracked dev node '{}' has no directory", install.name);
            result.dev_nodes_missing.push(install.name.clone());
        } else {
            debug!("Planning install of '{package_id}'");
            planned.push(PlannedInstall {
                package_id: package_id.clone(),
                install: install.clone(),
            });
        }
    }

    // Filesystem side: classify extras.
    let tracked: Vec<&str> = manifest_nodes
        .values()
        .map(|install| install.name.as_str())
        .collect();
    let mut entries: Vec<_> = fs_err::read_dir(custom_nodes_path)?
        .filter_map(Result::ok)
        .collect();
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.')
            || name.ends_with(".disabled")
            || SYSTEM_CUSTOM_NODES.contains(&name.as_str())
            || tracked.contains(&name.as_str())
        {
            continue;
        }

        let node_dir = entry.path();
        if node_dir.join(".git").exists() {
            if policy.remove_extra_nodes {
                fs_err::remove_dir_all(&node_dir)?;
                info!("Removed extra node '{name}' (not in the manifest)");
                result.nodes_removed.push(name);
            } else {
                warn!("Extra node '{name}' is not in the manifest (kept)");
                result.nodes_kept.push(name);
            }
        } else if policy.preserve_dev_work {
            // Checkout mode: in-progress local work is invisible to
            // reconciliation.
            debug!("Preserving untracked dev directory '{name}'");
        } else {
            // No `.git`: this looks like local development work.
            disable_node(custom_nodes_path, &name)?;
            result.nodes_disabled.push(name);
        }
    }

    Ok(planned)
}

/// Rename a directory aside instead of deleting it. An existing
/// `.disabled` is first moved to a timestamped backup so nothing is ever
/// overwritten.
fn disable_node(custom_nodes_path: &Path, name: &str) -> Result<(), Error> {
    let node_dir = custom_nodes_path.join(name);
    let disabled = custom_nodes_path.join(format!("{name}.disabled"));

    if disabled.exists() {
        let stamp = jiff::Timestamp::now().strftime("%Y%m%dT%H%M%S");
        let backup = custom_nodes_path.join(format!("{name}.{stamp}.disabled"));
        fs_err::rename(&disabled, &backup)?;
        info!(
            "Backed up prior disabled copy of '{name}' to {}",
            backup.display()
        );
    }

    fs_err::rename(&node_dir, &disabled)?;
    info!("Disabled extra node '{name}' (renamed to {name}.disabled)");
    Ok(())
}
