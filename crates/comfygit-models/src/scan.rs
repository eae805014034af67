use std::collections::HashSet;
use std::path::Path;

use path_slash::PathExt;
use rusqlite::OptionalExtension;
use tracing::{debug, warn};

use comfygit_cache::{hash_file, short_hash};
use comfygit_types::ModelWithLocation;

use crate::{Error, ModelRepository};

/// Counts from one index scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub scanned: usize,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub removed: usize,
}

impl ModelRepository {
    /// Walk the shared models root and bring the index in line with disk.
    ///
    /// Unchanged files (same mtime and size as the indexed location) are
    /// skipped without rehashing; anything else is streamed through
    /// BLAKE3. Locations whose file vanished are dropped, and hash rows
    /// with no remaining location are pruned at the end.
    pub fn rescan(
        &mut self,
        models_root: &Path,
        extensions: &[&str],
    ) -> Result<ScanSummary, Error> {
        let mut summary = ScanSummary::default();
        let mut seen_paths: HashSet<String> = HashSet::new();
        let last_seen = jiff::Timestamp::now().as_second();

        for entry in walkdir::WalkDir::new(models_root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
        {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if !extensions.iter().any(|ext| name.ends_with(ext)) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(models_root) else {
                continue;
            };
            let relative_path = relative.to_slash_lossy().into_owned();
            // Files directly under the root have no category directory.
            if !relative_path.contains('/') {
                continue;
            }

            summary.scanned += 1;
            seen_paths.insert(relative_path.clone());

            let stat = match entry.metadata() {
                Ok(stat) => stat,
                Err(err) => {
                    warn!("Skipping unreadable model file {relative_path}: {err}");
                    continue;
                }
            };
            let mtime_ns = stat
                .modified()
                .ok()
                .and_then(|modified| modified.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|duration| duration.as_nanos() as i64)
                .unwrap_or_default();

            // Fast path: an indexed location with the same mtime and size
            // is taken as unchanged.
            if let Some((hash, indexed_mtime, indexed_size)) =
                self.indexed_location(&relative_path)?
            {
                if indexed_mtime == mtime_ns && indexed_size == stat.len() {
                    self.touch(&hash, last_seen)?;
                    summary.unchanged += 1;
                    continue;
                }
            }

            let digest = match hash_file(path) {
                Ok(digest) => digest,
                Err(err) => {
                    warn!("Failed to hash {relative_path}: {err}");
                    continue;
                }
            };
            let hash = short_hash(&digest.blake3).to_string();
            let existed = !self.find_by_hash(&hash)?.is_empty();

            self.upsert(&ModelWithLocation {
                hash,
                file_size: digest.file_size,
                relative_path: relative_path.clone(),
                filename: name.to_string(),
                mtime_ns,
                last_seen,
                blake3_hash: Some(digest.blake3),
                sha256_hash: None,
            })?;

            if existed {
                summary.updated += 1;
            } else {
                summary.added += 1;
            }
            debug!("Indexed model at {relative_path}");
        }

        // Locations whose file no longer exists on disk.
        for stale in self.stale_locations(&seen_paths)? {
            self.remove_location(&stale)?;
            summary.removed += 1;
            debug!("Removed vanished model location {stale}");
        }
        self.prune_orphan_models()?;

        Ok(summary)
    }

    fn indexed_location(
        &self,
        relative_path: &str,
    ) -> Result<Option<(String, i64, u64)>, Error> {
        let row = self
            .conn
            .query_row(
                "SELECT l.hash, l.mtime_ns, m.file_size
                 FROM locations l JOIN models m ON l.hash = m.hash
                 WHERE l.relative_path = ?1",
                (relative_path,),
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)? as u64,
                    ))
                },
            )
            .optional()?;
        Ok(row)
    }

    fn stale_locations(&self, seen: &HashSet<String>) -> Result<Vec<String>, Error> {
        let mut statement = self.conn.prepare("SELECT relative_path FROM locations")?;
        let rows = statement.query_map((), |row| row.get::<_, String>(0))?;
        let mut stale = Vec::new();
        for path in rows {
            let path = path?;
            if !seen.contains(&path) {
                stale.push(path);
            }
        }
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXTENSIONS: &[&str] = &[".safetensors", ".ckpt", ".pth"];

    fn write_model(root: &Path, relative: &str, bytes: &[u8]) {
        let path = root.join(relative);
        fs_err::create_dir_all(path.parent().unwrap()).unwrap();
        fs_err::write(path, bytes).unwrap();
    }

    #[test]
    fn scan_indexes_new_models() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        write_model(root.path(), "checkpoints/sd15.safetensors", b"checkpoint");
        write_model(root.path(), "vae/qwen_image_vae.safetensors", b"vae");
        write_model(root.path(), "checkpoints/readme.txt", b"not a model");

        let mut repo = ModelRepository::in_memory()?;
        let summary = repo.rescan(root.path(), EXTENSIONS)?;

        assert_eq!(summary.scanned, 2);
        assert_eq!(summary.added, 2);
        assert_eq!(repo.get_all()?.len(), 2);
        Ok(())
    }

    #[test]
    fn unchanged_files_are_not_rehashed() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        write_model(root.path(), "checkpoints/sd15.safetensors", b"checkpoint");

        let mut repo = ModelRepository::in_memory()?;
        repo.rescan(root.path(), EXTENSIONS)?;
        let summary = repo.rescan(root.path(), EXTENSIONS)?;

        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.added, 0);
        assert_eq!(summary.updated, 0);
        Ok(())
    }

    #[test]
    fn rewritten_file_is_rehashed_in_place() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        write_model(root.path(), "checkpoints/model.safetensors", b"v1");

        let mut repo = ModelRepository::in_memory()?;
        repo.rescan(root.path(), EXTENSIONS)?;
        let before = repo.get_all()?[0].hash.clone();

        write_model(root.path(), "checkpoints/model.safetensors", b"v2 content");
        filetime::set_file_mtime(
            root.path().join("checkpoints/model.safetensors"),
            filetime::FileTime::from_unix_time(2_000_000_000, 0),
        )?;
        repo.rescan(root.path(), EXTENSIONS)?;

        let all = repo.get_all()?;
        assert_eq!(all.len(), 1);
        assert_ne!(all[0].hash, before);
        // The superseded hash lost its only location and was pruned.
        assert!(repo.find_by_hash(&before)?.is_empty());
        Ok(())
    }

    #[test]
    fn deleted_file_drops_location_and_prunes_hash() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        write_model(root.path(), "checkpoints/one.safetensors", b"shared bytes");
        write_model(root.path(), "loras/one.safetensors", b"shared bytes");

        let mut repo = ModelRepository::in_memory()?;
        repo.rescan(root.path(), EXTENSIONS)?;
        let hash = repo.get_all()?[0].hash.clone();
        assert_eq!(repo.find_by_hash(&hash)?.len(), 2);

        // One copy vanishes: the location goes, the hash stays.
        fs_err::remove_file(root.path().join("loras/one.safetensors"))?;
        let summary = repo.rescan(root.path(), EXTENSIONS)?;
        assert_eq!(summary.removed, 1);
        assert_eq!(repo.find_by_hash(&hash)?.len(), 1);

        // The last copy vanishes: the hash row goes too.
        fs_err::remove_file(root.path().join("checkpoints/one.safetensors"))?;
        repo.rescan(root.path(), EXTENSIONS)?;
        assert!(repo.find_by_hash(&hash)?.is_empty());
        Ok(())
    }
}
