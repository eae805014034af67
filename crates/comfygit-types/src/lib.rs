pub use manifest::{Criticality, CustomNodeMapping, ManifestModel, ModelStatus, WorkflowModel};
pub use model::{ModelLocation, ModelRecord, ModelSource, ModelSourceKind, ModelWithLocation};
pub use node::{NodeInstall, NodeSourceKind, RegistryPackage, RegistryPackageVersion};
pub use resolution::{
    CategoryMismatch, Confidence, ModelMatchType, NodeMatchType, ResolutionResult, ResolvedModel,
    ResolvedNodePackage, ScoredModelMatch, ScoredPackageMatch,
};
pub use sync::{SyncResult, WorkflowResolutionSummary};
pub use workflow::{
    WidgetValue, WorkflowDependencies, WorkflowNode, WorkflowNodeWidgetRef, WorkflowSyncStatus,
};

mod manifest;
mod model;
mod node;
mod resolution;
mod sync;
mod workflow;
