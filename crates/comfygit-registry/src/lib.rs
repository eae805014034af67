pub use github::{is_git_url, normalize_github_url};
pub use mirror::{RegistryMirror, SignatureMapping};
pub use signature::{input_signature, node_key, type_only_key};

mod github;
mod mirror;
mod signature;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to parse the node mapping data file")]
    Parse(#[from] serde_json::Error),
}
