pub use backend::{TorchBackend, PYTORCH_CORE_PACKAGES};
pub use backend_file::BackendFile;
pub use config::{TorchConfig, TorchIndex};
pub use version_cache::TorchVersionCache;

mod backend;
mod backend_file;
mod config;
mod version_cache;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("No PyTorch backend is configured; run backend detection first")]
    BackendMissing,

    #[error("Invalid PyTorch backend: `{0}`")]
    BackendInvalid(String),

    #[error("Failed to parse the PyTorch version cache")]
    CacheParse(#[from] toml_edit::TomlError),
}
