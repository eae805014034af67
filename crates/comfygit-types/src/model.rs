use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Core model identity, unique by content hash.
///
/// The primary `hash` is the short form of the BLAKE3 digest; the full
/// BLAKE3 and an optional SHA-256 are kept alongside for external
/// compatibility (e.g. matching published checksums).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub hash: String,
    pub file_size: u64,
    pub blake3_hash: Option<String>,
    pub sha256_hash: Option<String>,
    /// Unix seconds of the last index scan that observed this model.
    pub last_seen: i64,
}

/// A location where a model exists on disk, relative to the shared models
/// root. The same hash may have several locations (the file was copied
/// into more than one category directory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelLocation {
    pub hash: String,
    pub relative_path: String,
    pub filename: String,
    /// File modification time, in nanoseconds since the Unix epoch.
    pub mtime_ns: i64,
}

impl ModelLocation {
    /// The first path component of `relative_path`, i.e. the category
    /// directory the file lives under.
    pub fn category(&self) -> &str {
        self.relative_path
            .split('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

/// Combined model + location row, the shape most lookups return.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelWithLocation {
    pub hash: String,
    pub file_size: u64,
    pub relative_path: String,
    pub filename: String,
    pub mtime_ns: i64,
    pub last_seen: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blake3_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_hash: Option<String>,
}

impl ModelWithLocation {
    /// The category directory (first component of the relative path).
    pub fn category(&self) -> &str {
        self.relative_path
            .split('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}

/// Where a model can be fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSourceKind {
    Huggingface,
    Civitai,
    Direct,
}

impl ModelSourceKind {
    /// Classify a URL by its host.
    pub fn from_url(url: &str) -> Self {
        if url.contains("huggingface.co") {
            Self::Huggingface
        } else if url.contains("civitai.com") {
            Self::Civitai
        } else {
            Self::Direct
        }
    }
}

impl fmt::Display for ModelSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Huggingface => f.write_str("huggingface"),
            Self::Civitai => f.write_str("civitai"),
            Self::Direct => f.write_str("direct"),
        }
    }
}

impl FromStr for ModelSourceKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "huggingface" => Ok(Self::Huggingface),
            "civitai" => Ok(Self::Civitai),
            "direct" => Ok(Self::Direct),
            _ => Err(()),
        }
    }
}

/// A typed download source for a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSource {
    pub url: String,
    pub kind: ModelSourceKind,
}

impl ModelSource {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let kind = ModelSourceKind::from_url(&url);
        Self { url, kind }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_is_first_path_component() {
        let location = ModelLocation {
            hash: "abc123".to_string(),
            relative_path: "checkpoints/sd15/model.safetensors".to_string(),
            filename: "model.safetensors".to_string(),
            mtime_ns: 0,
        };
        assert_eq!(location.category(), "checkpoints");
    }

    #[test]
    fn source_kind_from_url() {
        assert_eq!(
            ModelSourceKind::from_url("https://huggingface.co/foo/bar/resolve/main/x.safetensors"),
            ModelSourceKind::Huggingface
        );
        assert_eq!(
            ModelSourceKind::from_url("https://civitai.com/api/download/models/12345"),
            ModelSourceKind::Civitai
        );
        assert_eq!(
            ModelSourceKind::from_url("https://example.com/x.pth"),
            ModelSourceKind::Direct
        );
    }
}
