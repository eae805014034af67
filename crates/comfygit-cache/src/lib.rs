use std::io;
use std::path::{Path, PathBuf};

use etcetera::BaseStrategy;

pub use analysis::{AnalysisCache, CachedAnalysis};
pub use content_store::{ContentStore, IndexEntry};
pub use digest::{cache_digest, content_digest, hash_file, short_hash, FileDigest};

mod analysis;
mod content_store;
mod digest;

/// Environment variable overriding the cache root.
pub const CACHE_ENV_VAR: &str = "COMFYGIT_CACHE";

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("Failed to access the analysis cache database")]
    Database(#[from] rusqlite::Error),

    #[error("Failed to encode a cache payload")]
    Payload(#[from] serde_json::Error),

    #[error("Could not determine a cache directory for this platform")]
    NoCacheDir,
}

/// Platform-aware cache root resolution.
///
/// Priority: the `COMFYGIT_CACHE` environment variable, then the
/// platform's user cache directory (`~/.cache/comfygit`,
/// `~/Library/Caches/comfygit`, `%LOCALAPPDATA%\comfygit`).
#[derive(Debug, Clone)]
pub struct CacheDirs {
    root: PathBuf,
}

impl CacheDirs {
    /// Resolve the cache root from the environment and platform defaults.
    pub fn discover() -> Result<Self, Error> {
        if let Some(root) = std::env::var_os(CACHE_ENV_VAR).filter(|value| !value.is_empty()) {
            return Ok(Self { root: root.into() });
        }
        let strategy = etcetera::choose_base_strategy().map_err(|_| Error::NoCacheDir)?;
        Ok(Self {
            root: strategy.cache_dir().join("comfygit"),
        })
    }

    /// A cache rooted at an explicit path (primarily for tests).
    pub fn from_path(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The directory for one content type, e.g. `comfyui` or `custom_nodes`.
    pub fn content_dir(&self, content_type: &str) -> PathBuf {
        self.root.join(content_type)
    }
}
