//! Reproducibility engine for generative-image workflow environments.
//!
//! A workflow (a node graph saved as JSON by the host) references
//! external artifacts: Python packages, custom node plugins, and model
//! files identified by content hash. This crate makes an environment
//! exactly reproducible from a committed manifest: the resolver matches
//! workflow references to packages and on-disk models, the manifest
//! records the result, and the reconciler brings the filesystem in line.

pub use environment::{Environment, EnvironmentOptions};
pub use status::{EnvironmentStatus, WorkflowAnalysisStatus};

pub use comfygit_resolver::{
    AutoResolver, ModelResolutionContext, ModelResolutionStrategy, NoOpResolver,
    NodeResolutionContext, NodeResolutionStrategy,
};
pub use comfygit_sync::NodeSyncPolicy;
pub use comfygit_types as types;

mod environment;
mod status;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Cache(#[from] comfygit_cache::Error),

    #[error(transparent)]
    Manifest(#[from] comfygit_manifest::Error),

    #[error(transparent)]
    ModelIndex(#[from] comfygit_models::Error),

    #[error(transparent)]
    Registry(#[from] comfygit_registry::Error),

    #[error(transparent)]
    Resolver(#[from] comfygit_resolver::Error),

    #[error(transparent)]
    Sync(#[from] comfygit_sync::Error),

    #[error(transparent)]
    Torch(#[from] comfygit_torch::Error),

    #[error(transparent)]
    Workflow(#[from] comfygit_workflow::Error),
}
