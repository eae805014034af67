pub use context::{ModelResolutionContext, NodeResolutionContext};
pub use model::{ModelResolution, ModelResolver};
pub use node::{NodeResolution, NodeResolver};
pub use resolver::WorkflowResolver;
pub use search::{search_models, search_packages};
pub use strategy::{
    AutoResolver, ConflictChoice, ConflictResolver, ModelResolutionStrategy, NoOpResolver,
    NodeResolutionStrategy,
};

mod context;
mod model;
mod node;
mod resolver;
mod search;
mod strategy;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Manifest(#[from] comfygit_manifest::Error),

    #[error(transparent)]
    ModelIndex(#[from] comfygit_models::Error),

    #[error(transparent)]
    Workflow(#[from] comfygit_workflow::Error),

    #[error(transparent)]
    Cache(#[from] comfygit_cache::Error),
}
