use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{Error, TorchBackend};

const BACKEND_FILE_NAME: &str = ".pytorch-backend";

/// The `.pytorch-backend` file inside an environment's `.cec` directory.
///
/// Plain text, one token. Gitignored so that machines sharing the same
/// committed environment can run different accelerators.
#[derive(Debug)]
pub struct BackendFile {
    cec_path: PathBuf,
    backend_file: PathBuf,
}

impl BackendFile {
    pub fn new(cec_path: impl Into<PathBuf>) -> Self {
        let cec_path = cec_path.into();
        let backend_file = cec_path.join(BACKEND_FILE_NAME);
        Self {
            cec_path,
            backend_file,
        }
    }

    pub fn path(&self) -> &Path {
        &self.backend_file
    }

    pub fn exists(&self) -> bool {
        self.read().is_ok()
    }

    /// Read and validate the pinned backend.
    ///
    /// A missing or empty file is `BackendMissing`: without the pin the
    /// core refuses to compute backend-specific Python configuration.
    pub fn read(&self) -> Result<TorchBackend, Error> {
        let text = match fs_err::read_to_string(&self.backend_file) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::BackendMissing);
            }
            Err(err) => return Err(err.into()),
        };
        let backend = text.parse()?;
        debug!("Read PyTorch backend from file: {backend}");
        Ok(backend)
    }

    /// Write the pin and make sure it stays out of version control.
    pub fn write(&self, backend: &TorchBackend) -> Result<(), Error> {
        fs_err::create_dir_all(&self.cec_path)?;
        fs_err::write(&self.backend_file, backend.as_str())?;
        info!("Set PyTorch backend: {backend}");
        self.ensure_gitignore_entry()?;
        Ok(())
    }

    /// Older environments predate the gitignore entry; writing the pin
    /// repairs it.
    fn ensure_gitignore_entry(&self) -> Result<(), Error> {
        let gitignore = self.cec_path.join(".gitignore");
        let entry = BACKEND_FILE_NAME;

        let current = match fs_err::read_to_string(&gitignore) {
            Ok(current) => current,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                fs_err::write(
                    &gitignore,
                    format!("# PyTorch backend pin (machine-specific)\n{entry}\n"),
                )?;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let present = current.lines().any(|line| {
            line.split('#').next().map(str::trim) == Some(entry)
        });
        if present {
            return Ok(());
        }

        let mut updated = current;
        if !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&format!(
            "\n# PyTorch backend pin (machine-specific)\n{entry}\n"
        ));
        fs_err::write(&gitignore, updated)?;
        info!("Added {entry} to .gitignore");
        Ok(())
    }
}
