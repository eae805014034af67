use std::path::PathBuf;

pub use archive::sanitized_entry_path;
pub use model_paths::{sync_model_paths, ModelPathsStatus};
pub use nodes::{reconcile_nodes, NodeSyncPolicy, PlannedInstall, SYSTEM_CUSTOM_NODES};

mod archive;
mod model_paths;
mod nodes;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Refusing to extract archive entry outside the target directory: {0}")]
    UnsafeArchivePath(PathBuf),

    #[error("Failed to serialize the model paths configuration")]
    ModelPathsEncode(#[from] serde_yaml::Error),

    /// A collaborator-executed command (package sync, clone, download)
    /// failed; carried through so callers can attach it to a
    /// [`comfygit_types::SyncResult`].
    #[error("`{argv}` failed with exit status {exit}: {stderr}")]
    Subprocess {
        argv: String,
        exit: i32,
        stderr: String,
    },
}
