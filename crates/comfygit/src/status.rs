use comfygit_types::{ResolutionResult, WorkflowDependencies, WorkflowSyncStatus};

/// Full analysis for one workflow, as the status view reports it.
#[derive(Debug, Clone)]
pub struct WorkflowAnalysisStatus {
    pub name: String,
    /// "new", "modified", or "synced".
    pub sync_state: String,
    pub dependencies: WorkflowDependencies,
    pub resolution: ResolutionResult,
    /// Packages the resolution needs that the manifest does not install.
    pub uninstalled_nodes: Vec<String>,
}

/// Aggregate status across every workflow in the environment.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentStatus {
    pub sync_status: WorkflowSyncStatus,
    pub analyzed_workflows: Vec<WorkflowAnalysisStatus>,
    /// Workflows whose analysis failed: (name, error). A single failure
    /// never aborts the aggregate.
    pub errored_workflows: Vec<(String, String)>,
}

impl EnvironmentStatus {
    /// Every analyzed workflow resolved completely and nothing errored.
    pub fn is_resolved(&self) -> bool {
        self.errored_workflows.is_empty()
            && self
                .analyzed_workflows
                .iter()
                .all(|workflow| workflow.resolution.is_fully_resolved())
    }
}
