use std::path::{Component, Path, PathBuf};

use crate::Error;

/// Validate an archive entry name against its extraction target.
///
/// Returns the full path to write, or `UnsafeArchivePath` for absolute
/// entries and any `..` traversal. Nothing is written for a rejected
/// entry; extraction itself happens outside the core.
pub fn sanitized_entry_path(entry_name: &str, dest: &Path) -> Result<PathBuf, Error> {
    let entry = Path::new(entry_name);
    if entry.is_absolute() || entry_name.starts_with('/') || entry_name.starts_with('\\') {
        return Err(Error::UnsafeArchivePath(entry.to_path_buf()));
    }

    let mut sanitized = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::Normal(part) => sanitized.push(part),
            Component::CurDir => {}
            // `..`, drive prefixes, and roots all escape the target.
            Component::ParentDir | Component::Prefix(_) | Component::RootDir => {
                return Err(Error::UnsafeArchivePath(entry.to_path_buf()));
            }
        }
    }
    if sanitized.as_os_str().is_empty() {
        return Err(Error::UnsafeArchivePath(entry.to_path_buf()));
    }
    Ok(dest.join(sanitized))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_entries_land_under_the_target() -> anyhow::Result<()> {
        let dest = Path::new("/tmp/extract");
        assert_eq!(
            sanitized_entry_path("pack/nodes.py", dest)?,
            dest.join("pack/nodes.py")
        );
        assert_eq!(
            sanitized_entry_path("./pack/./__init__.py", dest)?,
            dest.join("pack/__init__.py")
        );
        Ok(())
    }

    #[test]
    fn traversal_is_rejected() {
        let dest = Path::new("/tmp/extract");
        for name in [
            "../etc/passwd",
            "pack/../../etc/passwd",
            "/etc/passwd",
            "..",
        ] {
            assert!(
                matches!(
                    sanitized_entry_path(name, dest),
                    Err(Error::UnsafeArchivePath(_))
                ),
                "{name} should be rejected"
            );
        }
    }
}
