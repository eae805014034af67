use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Per-workflow resolution counts gathered during a sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowResolutionSummary {
    pub name: String,
    pub resolved_count: usize,
    pub unresolved_count: usize,
    pub ambiguous_count: usize,
}

/// Structured result of reconciling an environment against its manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub packages_synced: bool,
    pub nodes_installed: Vec<String>,
    pub nodes_removed: Vec<String>,
    /// Extra non-git directories renamed aside rather than deleted.
    pub nodes_disabled: Vec<String>,
    /// Extra nodes kept because the policy only warns about them.
    pub nodes_kept: Vec<String>,
    /// Tracked dev nodes whose directory is missing; reported, never fatal.
    pub dev_nodes_missing: Vec<String>,
    pub model_paths_configured: bool,
    /// Workflow name → action taken ("in_sync", "copied", "removed", ...).
    pub workflows_synced: BTreeMap<String, String>,
    pub workflow_resolutions: Vec<WorkflowResolutionSummary>,
    pub errors: Vec<String>,
    pub success: bool,
}

impl SyncResult {
    pub fn new() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn has_changes(&self) -> bool {
        self.packages_synced
            || !self.nodes_installed.is_empty()
            || !self.nodes_removed.is_empty()
            || !self.nodes_disabled.is_empty()
            || self
                .workflows_synced
                .values()
                .any(|action| action != "in_sync")
            || !self.workflow_resolutions.is_empty()
    }

    pub fn has_unresolved_models(&self) -> bool {
        self.workflow_resolutions
            .iter()
            .any(|summary| summary.unresolved_count > 0)
    }

    pub fn record_error(&mut self, fatal: bool, message: impl Into<String>) {
        self.errors.push(message.into());
        if fatal {
            self.success = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_fatal_errors_keep_success() {
        let mut result = SyncResult::new();
        result.record_error(false, "one node install failed");
        assert!(result.success);
        result.record_error(true, "manifest unreadable");
        assert!(!result.success);
    }

    #[test]
    fn in_sync_workflows_are_not_changes() {
        let mut result = SyncResult::new();
        result
            .workflows_synced
            .insert("portrait".to_string(), "in_sync".to_string());
        assert!(!result.has_changes());
        result
            .workflows_synced
            .insert("landscape".to_string(), "copied".to_string());
        assert!(result.has_changes());
    }
}
