use std::path::PathBuf;

pub use config::{ModelPathConfig, BUILTIN_NODE_TYPES, DEFAULT_MODEL_EXTENSIONS};
pub use document::WorkflowDocument;
pub use extract::{classify_nodes, extract_model_refs, NodeClassification};
pub use normalize::{normalize_workflow, workflow_content_hash};
pub use path_update::{update_workflow_model_paths, PathUpdateCounts};
pub use sync::WorkflowSync;

mod config;
mod document;
mod extract;
mod normalize;
mod path_update;
mod sync;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to parse workflow JSON")]
    Parse(#[from] serde_json::Error),

    #[error("Workflow not found at: {0}")]
    Missing(PathBuf),
}
