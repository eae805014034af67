use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{CacheDirs, Error};

/// Metadata recorded for one cached entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub cache_key: String,
    pub cached_at: jiff::Timestamp,
    pub size_bytes: u64,
    pub content_hash: String,
    #[serde(flatten)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: String,
    content_type: String,
    updated_at: jiff::Timestamp,
    items: BTreeMap<String, IndexEntry>,
}

/// A content-hashed directory store for one content type.
///
/// Layout: `<root>/<content-type>/store/<cache-key>/content/` with a
/// sibling `metadata.json` per entry and a single `index.json` for the
/// content type. Index writes are atomic (temp file, then rename).
#[derive(Debug)]
pub struct ContentStore {
    content_type: String,
    store_dir: PathBuf,
    index_file: PathBuf,
    index: BTreeMap<String, IndexEntry>,
}

impl ContentStore {
    pub fn new(dirs: &CacheDirs, content_type: &str) -> Result<Self, Error> {
        let cache_dir = dirs.content_dir(content_type);
        let store_dir = cache_dir.join("store");
        fs_err::create_dir_all(&store_dir)?;
        let index_file = cache_dir.join("index.json");
        let index = Self::load_index(&index_file);
        Ok(Self {
            content_type: content_type.to_string(),
            store_dir,
            index_file,
            index,
        })
    }

    /// A corrupt or missing index is rebuilt empty, never surfaced.
    fn load_index(index_file: &Path) -> BTreeMap<String, IndexEntry> {
        let bytes = match fs_err::read(index_file) {
            Ok(bytes) => bytes,
            Err(_) => return BTreeMap::new(),
        };
        match serde_json::from_slice::<IndexFile>(&bytes) {
            Ok(file) => file.items,
            Err(err) => {
                warn!(
                    "Discarding corrupt cache index at {}: {err}",
                    index_file.display()
                );
                BTreeMap::new()
            }
        }
    }

    fn save_index(&self) -> Result<(), Error> {
        let file = IndexFile {
            version: "1.0".to_string(),
            content_type: self.content_type.clone(),
            updated_at: jiff::Timestamp::now(),
            items: self.index.clone(),
        };
        let parent = self
            .index_file
            .parent()
            .expect("index file has a parent directory");
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut temp, &file)?;
        temp.flush()?;
        temp.persist(&self.index_file)
            .map_err(|err| Error::Io(err.error))?;
        Ok(())
    }

    /// Cache a directory tree under the given key, replacing any prior
    /// entry for that key.
    pub fn cache_content(
        &mut self,
        cache_key: &str,
        source: &Path,
        metadata: BTreeMap<String, serde_json::Value>,
    ) -> Result<PathBuf, Error> {
        let entry_dir = self.store_dir.join(cache_key);
        let content_dir = entry_dir.join("content");

        if entry_dir.exists() {
            fs_err::remove_dir_all(&entry_dir)?;
        }
        fs_err::create_dir_all(&entry_dir)?;
        copy_dir_all(source, &content_dir)?;

        let (size_bytes, content_hash) = tree_digest(&content_dir)?;
        let entry = IndexEntry {
            cache_key: cache_key.to_string(),
            cached_at: jiff::Timestamp::now(),
            size_bytes,
            content_hash,
            metadata,
        };

        let metadata_file = entry_dir.join("metadata.json");
        fs_err::write(&metadata_file, serde_json::to_vec_pretty(&entry)?)?;

        self.index.insert(cache_key.to_string(), entry);
        self.save_index()?;

        debug!("Cached {} content under key {cache_key}", self.content_type);
        Ok(content_dir)
    }

    /// The content directory for a key, if it exists on disk.
    pub fn cached_path(&self, cache_key: &str) -> Option<PathBuf> {
        let content_dir = self.store_dir.join(cache_key).join("content");
        content_dir.is_dir().then_some(content_dir)
    }

    pub fn entry(&self, cache_key: &str) -> Option<&IndexEntry> {
        self.index.get(cache_key)
    }

    /// Recompute the tree hash for a key and compare against the index.
    pub fn verify(&self, cache_key: &str) -> Result<bool, Error> {
        let Some(entry) = self.index.get(cache_key) else {
            return Ok(false);
        };
        let Some(content_dir) = self.cached_path(cache_key) else {
            return Ok(false);
        };
        let (_, content_hash) = tree_digest(&content_dir)?;
        Ok(content_hash == entry.content_hash)
    }

    pub fn remove(&mut self, cache_key: &str) -> Result<(), Error> {
        let entry_dir = self.store_dir.join(cache_key);
        if entry_dir.exists() {
            fs_err::remove_dir_all(&entry_dir)?;
        }
        if self.index.remove(cache_key).is_some() {
            self.save_index()?;
        }
        Ok(())
    }
}

/// SHA-256 over the sorted file tree: each file contributes its relative
/// path and its contents, so renames and edits both change the digest.
fn tree_digest(content_dir: &Path) -> Result<(u64, String), Error> {
    let mut hasher = Sha256::new();
    let mut size_bytes = 0u64;

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(content_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .collect();
    files.sort();

    for path in files {
        let relative = path
            .strip_prefix(content_dir)
            .expect("walked file is under the content dir");
        hasher.update(relative.to_string_lossy().as_bytes());
        let bytes = fs_err::read(&path)?;
        size_bytes += bytes.len() as u64;
        hasher.update(&bytes);
    }

    Ok((size_bytes, hex::encode(hasher.finalize())))
}

fn copy_dir_all(source: &Path, dest: &Path) -> Result<(), Error> {
    fs_err::create_dir_all(dest)?;
    for entry in fs_err::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs_err::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::CacheDirs;

    fn store(root: &Path) -> ContentStore {
        ContentStore::new(&CacheDirs::from_path(root), "custom_nodes").unwrap()
    }

    #[test]
    fn cache_and_retrieve_content() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = tempfile::tempdir()?;
        fs_err::write(source.path().join("__init__.py"), b"# node pack")?;

        let mut store = store(root.path());
        let content = store.cache_content("my-node@1.0.0", source.path(), BTreeMap::new())?;
        assert!(content.join("__init__.py").exists());
        assert_eq!(store.cached_path("my-node@1.0.0"), Some(content));
        assert!(store.verify("my-node@1.0.0")?);
        Ok(())
    }

    #[test]
    fn recaching_replaces_prior_entry() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = tempfile::tempdir()?;
        fs_err::write(source.path().join("a.py"), b"old")?;

        let mut store = store(root.path());
        store.cache_content("pack", source.path(), BTreeMap::new())?;

        fs_err::remove_file(source.path().join("a.py"))?;
        fs_err::write(source.path().join("b.py"), b"new")?;
        let content = store.cache_content("pack", source.path(), BTreeMap::new())?;

        assert!(!content.join("a.py").exists());
        assert!(content.join("b.py").exists());
        Ok(())
    }

    #[test]
    fn corrupt_index_is_rebuilt() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let index = root.path().join("custom_nodes").join("index.json");
        fs_err::create_dir_all(index.parent().unwrap())?;
        fs_err::write(&index, b"{not json")?;

        let store = store(root.path());
        assert!(store.entry("anything").is_none());
        Ok(())
    }

    #[test]
    fn verify_detects_tampering() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let source = tempfile::tempdir()?;
        fs_err::write(source.path().join("nodes.py"), b"NODE_CLASS_MAPPINGS = {}")?;

        let mut store = store(root.path());
        let content = store.cache_content("pack", source.path(), BTreeMap::new())?;
        fs_err::write(content.join("nodes.py"), b"tampered")?;
        assert!(!store.verify("pack")?);
        Ok(())
    }
}
