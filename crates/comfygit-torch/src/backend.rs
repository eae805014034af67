use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::Error;

/// The packages that must come from the backend-specific index.
pub const PYTORCH_CORE_PACKAGES: &[&str] = &["torch", "torchvision", "torchaudio"];

/// A validated PyTorch backend token: `cu118`, `cu128`, `cpu`,
/// `rocm6.2`, `xpu`, ...
///
/// The token is machine-local state (each machine may run a different
/// accelerator) and never committed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TorchBackend(String);

fn backend_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(cu\d{2,3}|cpu|rocm\d+\.\d+|xpu)$").expect("backend pattern compiles")
    })
}

impl TorchBackend {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_cuda(&self) -> bool {
        self.0.starts_with("cu")
    }

    pub fn is_cpu(&self) -> bool {
        self.0 == "cpu"
    }

    /// The index URL serving wheels for this backend.
    pub fn index_url(&self) -> String {
        format!("https://download.pytorch.org/whl/{}", self.0)
    }

    /// The index name used in the Python configuration.
    pub fn index_name(&self) -> String {
        format!("pytorch-{}", self.0)
    }
}

impl FromStr for TorchBackend {
    type Err = Error;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::BackendMissing);
        }
        if backend_pattern().is_match(token) {
            Ok(Self(token.to_string()))
        } else {
            Err(Error::BackendInvalid(token.to_string()))
        }
    }
}

impl fmt::Display for TorchBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_backends_parse() {
        for token in ["cu118", "cu121", "cu128", "cu130", "cpu", "rocm6.2", "xpu"] {
            assert!(token.parse::<TorchBackend>().is_ok(), "{token}");
        }
    }

    #[test]
    fn invalid_backends_are_rejected() {
        for token in ["cuda", "cu1", "rocm6", "gpu", "CU128"] {
            assert!(matches!(
                token.parse::<TorchBackend>(),
                Err(Error::BackendInvalid(_))
            ));
        }
        assert!(matches!(
            "  ".parse::<TorchBackend>(),
            Err(Error::BackendMissing)
        ));
    }

    #[test]
    fn index_urls_follow_the_backend() {
        let backend: TorchBackend = "cu128".parse().unwrap();
        assert_eq!(backend.index_url(), "https://download.pytorch.org/whl/cu128");
        assert_eq!(backend.index_name(), "pytorch-cu128");
    }
}
