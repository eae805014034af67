use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use comfygit_types::WorkflowSyncStatus;

use crate::normalize::normalize_workflow;
use crate::Error;

/// What happened to one workflow during a copy or restore pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Copied,
    Restored,
    Preserved,
    Removed,
    Failed,
}

impl SyncAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copied => "copied",
            Self::Restored => "restored",
            Self::Preserved => "preserved",
            Self::Removed => "removed",
            Self::Failed => "failed",
        }
    }
}

/// Synchronizes workflow files between the host's workflow directory and
/// the committed copies under `.cec/workflows`.
#[derive(Debug)]
pub struct WorkflowSync {
    host_workflows: PathBuf,
    committed_workflows: PathBuf,
}

impl WorkflowSync {
    pub fn new(comfyui_path: &Path, cec_path: &Path) -> Result<Self, Error> {
        let host_workflows = comfyui_path.join("user").join("default").join("workflows");
        let committed_workflows = cec_path.join("workflows");
        fs_err::create_dir_all(&host_workflows)?;
        fs_err::create_dir_all(&committed_workflows)?;
        Ok(Self {
            host_workflows,
            committed_workflows,
        })
    }

    /// The host-side path for a workflow, if the file exists.
    pub fn workflow_path(&self, name: &str) -> Result<PathBuf, Error> {
        let path = self.host_workflows.join(format!("{name}.json"));
        if path.exists() {
            Ok(path)
        } else {
            Err(Error::Missing(path))
        }
    }

    pub fn host_dir(&self) -> &Path {
        &self.host_workflows
    }

    pub fn committed_dir(&self) -> &Path {
        &self.committed_workflows
    }

    /// File-level sync status between the two directories. Contents are
    /// compared on the normalized form, so UI-only resaves count as
    /// synced.
    pub fn status(&self) -> WorkflowSyncStatus {
        let host = list_workflows(&self.host_workflows);
        let committed = list_workflows(&self.committed_workflows);

        let mut status = WorkflowSyncStatus::default();
        for name in &host {
            if !committed.contains(name) {
                status.new.push(name.clone());
            } else if self.differs(name) {
                status.modified.push(name.clone());
            } else {
                status.synced.push(name.clone());
            }
        }
        for name in &committed {
            if !host.contains(name) {
                status.deleted.push(name.clone());
            }
        }
        status
    }

    fn differs(&self, name: &str) -> bool {
        let host_file = self.host_workflows.join(format!("{name}.json"));
        let committed_file = self.committed_workflows.join(format!("{name}.json"));
        if !committed_file.exists() {
            return true;
        }
        if !host_file.exists() {
            return false;
        }
        match (read_normalized(&host_file), read_normalized(&committed_file)) {
            (Some(host), Some(committed)) => host != committed,
            _ => {
                warn!("Could not compare workflow '{name}'; treating as modified");
                true
            }
        }
    }

    /// Copy every host workflow into the committed directory, and drop
    /// committed copies whose host file is gone. Returns the action per
    /// workflow; the caller invalidates caches for truly modified ones.
    pub fn copy_all(&self) -> BTreeMap<String, SyncAction> {
        let mut results = BTreeMap::new();
        for name in list_workflows(&self.host_workflows) {
            let source = self.host_workflows.join(format!("{name}.json"));
            let dest = self.committed_workflows.join(format!("{name}.json"));
            match fs_err::copy(&source, &dest) {
                Ok(_) => {
                    debug!("Copied workflow '{name}' into the committed set");
                    results.insert(name, SyncAction::Copied);
                }
                Err(err) => {
                    warn!("Failed to copy workflow '{name}': {err}");
                    results.insert(name, SyncAction::Failed);
                }
            }
        }

        let host: Vec<String> = list_workflows(&self.host_workflows);
        for name in list_workflows(&self.committed_workflows) {
            if !host.contains(&name) {
                let path = self.committed_workflows.join(format!("{name}.json"));
                match fs_err::remove_file(&path) {
                    Ok(()) => {
                        debug!("Deleted committed workflow '{name}' (no longer in the host)");
                        results.insert(name, SyncAction::Removed);
                    }
                    Err(err) => {
                        warn!("Failed to delete committed workflow '{name}': {err}");
                        results.insert(name, SyncAction::Failed);
                    }
                }
            }
        }
        results
    }

    /// Restore committed workflows into the host directory.
    ///
    /// With `preserve_uncommitted`, new and modified host workflows are
    /// left alone (branch-switch semantics); otherwise the host is forced
    /// to match the committed set exactly, including deletions.
    pub fn restore_all(&self, preserve_uncommitted: bool) -> BTreeMap<String, SyncAction> {
        let mut results = BTreeMap::new();

        let uncommitted: Vec<String> = if preserve_uncommitted {
            let status = self.status();
            status.new.into_iter().chain(status.modified).collect()
        } else {
            Vec::new()
        };

        for name in list_workflows(&self.committed_workflows) {
            if preserve_uncommitted && uncommitted.contains(&name) {
                debug!("Preserved uncommitted changes to workflow '{name}'");
                results.insert(name, SyncAction::Preserved);
                continue;
            }
            let source = self.committed_workflows.join(format!("{name}.json"));
            let dest = self.host_workflows.join(format!("{name}.json"));
            match fs_err::copy(&source, &dest) {
                Ok(_) => {
                    results.insert(name, SyncAction::Restored);
                }
                Err(err) => {
                    warn!("Failed to restore workflow '{name}': {err}");
                    results.insert(name, SyncAction::Failed);
                }
            }
        }

        // Cleanup always runs on a forced restore, so switching to a
        // state that never had workflows removes them from the host.
        if !preserve_uncommitted {
            let committed = list_workflows(&self.committed_workflows);
            for name in list_workflows(&self.host_workflows) {
                if !committed.contains(&name) {
                    let path = self.host_workflows.join(format!("{name}.json"));
                    match fs_err::remove_file(&path) {
                        Ok(()) => {
                            info!("Removed workflow '{name}' from the host (not committed)");
                            results.insert(name, SyncAction::Removed);
                        }
                        Err(err) => {
                            warn!("Failed to remove workflow '{name}': {err}");
                            results.insert(name, SyncAction::Failed);
                        }
                    }
                }
            }
        }
        results
    }
}

fn list_workflows(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs_err::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(Result::ok)
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                path.file_stem()
                    .and_then(|stem| stem.to_str())
                    .map(ToString::to_string)
            } else {
                None
            }
        })
        .collect();
    names.sort();
    names
}

fn read_normalized(path: &Path) -> Option<Value> {
    let bytes = fs_err::read(path).ok()?;
    let raw: Value = serde_json::from_slice(&bytes).ok()?;
    Some(normalize_workflow(&raw))
}
