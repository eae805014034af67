use std::path::Path;

use rusqlite::Connection;
use tracing::debug;

use comfygit_types::{ModelLocation, ModelSource, ModelSourceKind, ModelWithLocation};

use crate::Error;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS models (
        hash TEXT PRIMARY KEY,
        file_size INTEGER NOT NULL,
        blake3_hash TEXT,
        sha256_hash TEXT,
        last_seen INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS locations (
        hash TEXT NOT NULL REFERENCES models(hash),
        relative_path TEXT NOT NULL UNIQUE,
        filename TEXT NOT NULL,
        mtime_ns INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS locations_by_hash ON locations(hash);
    CREATE INDEX IF NOT EXISTS locations_by_filename ON locations(filename);
    CREATE TABLE IF NOT EXISTS sources (
        hash TEXT NOT NULL REFERENCES models(hash),
        url TEXT NOT NULL,
        kind TEXT NOT NULL,
        UNIQUE(hash, url)
    );
";

const SELECT_JOINED: &str = "
    SELECT m.hash, m.file_size, l.relative_path, l.filename, l.mtime_ns, m.last_seen,
           m.blake3_hash, m.sha256_hash
    FROM models m JOIN locations l ON m.hash = l.hash
";

/// The indexed set of model files on disk, keyed by content hash.
///
/// SQLite enforces the single-writer discipline; lookups are cheap SQL,
/// ranking is the resolver's job.
pub struct ModelRepository {
    pub(crate) conn: Connection,
}

impl std::fmt::Debug for ModelRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRepository").finish_non_exhaustive()
    }
}

impl ModelRepository {
    /// Open (or create) the index database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        if let Some(parent) = path.as_ref().parent() {
            fs_err::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// An in-memory index, for tests.
    pub fn in_memory() -> Result<Self, Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// All locations of the model with the given hash, primary first.
    pub fn find_by_hash(&self, hash: &str) -> Result<Vec<ModelWithLocation>, Error> {
        self.query_joined(
            &format!("{SELECT_JOINED} WHERE m.hash = ?1 ORDER BY l.relative_path"),
            (hash,),
        )
    }

    /// Every model whose filename matches exactly.
    pub fn find_by_filename(&self, filename: &str) -> Result<Vec<ModelWithLocation>, Error> {
        self.query_joined(
            &format!("{SELECT_JOINED} WHERE l.filename = ?1 ORDER BY l.relative_path"),
            (filename,),
        )
    }

    /// Every location whose first path component equals the category.
    pub fn get_by_category(&self, category: &str) -> Result<Vec<ModelWithLocation>, Error> {
        self.query_joined(
            &format!("{SELECT_JOINED} WHERE l.relative_path LIKE ?1 ORDER BY l.relative_path"),
            (format!("{category}/%"),),
        )
    }

    pub fn get_all(&self) -> Result<Vec<ModelWithLocation>, Error> {
        self.query_joined(&format!("{SELECT_JOINED} ORDER BY l.relative_path"), ())
    }

    /// A cheap `LIKE` prefilter over filenames and paths; callers rank.
    pub fn search(&self, term: &str) -> Result<Vec<ModelWithLocation>, Error> {
        let pattern = format!("%{term}%");
        self.query_joined(
            &format!(
                "{SELECT_JOINED} WHERE l.filename LIKE ?1 OR l.relative_path LIKE ?1
                 ORDER BY l.relative_path"
            ),
            (pattern,),
        )
    }

    pub fn get_locations(&self, hash: &str) -> Result<Vec<ModelLocation>, Error> {
        let mut statement = self.conn.prepare(
            "SELECT hash, relative_path, filename, mtime_ns FROM locations
             WHERE hash = ?1 ORDER BY relative_path",
        )?;
        let rows = statement.query_map((hash,), |row| {
            Ok(ModelLocation {
                hash: row.get(0)?,
                relative_path: row.get(1)?,
                filename: row.get(2)?,
                mtime_ns: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_sources(&self, hash: &str) -> Result<Vec<ModelSource>, Error> {
        let mut statement = self
            .conn
            .prepare("SELECT url, kind FROM sources WHERE hash = ?1 ORDER BY url")?;
        let rows = statement.query_map((hash,), |row| {
            let url: String = row.get(0)?;
            let kind: String = row.get(1)?;
            Ok((url, kind))
        })?;
        Ok(rows
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(url, kind)| ModelSource {
                kind: kind.parse().unwrap_or(ModelSourceKind::Direct),
                url,
            })
            .collect())
    }

    /// Record a download source for a model; duplicates are ignored.
    pub fn add_source(&self, hash: &str, url: &str) -> Result<(), Error> {
        let source = ModelSource::new(url);
        self.conn.execute(
            "INSERT OR IGNORE INTO sources (hash, url, kind) VALUES (?1, ?2, ?3)",
            (hash, &source.url, source.kind.to_string()),
        )?;
        Ok(())
    }

    /// Insert or refresh a model row and one of its locations.
    ///
    /// Used by the index scanner and by test fixtures; the upsert is a
    /// single transaction so a crash never leaves a location without its
    /// model row.
    pub fn upsert(&mut self, model: &ModelWithLocation) -> Result<(), Error> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO models (hash, file_size, blake3_hash, sha256_hash, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(hash) DO UPDATE SET
                file_size = excluded.file_size,
                blake3_hash = COALESCE(excluded.blake3_hash, models.blake3_hash),
                sha256_hash = COALESCE(excluded.sha256_hash, models.sha256_hash),
                last_seen = excluded.last_seen",
            (
                &model.hash,
                model.file_size as i64,
                model.blake3_hash.as_deref(),
                model.sha256_hash.as_deref(),
                model.last_seen,
            ),
        )?;
        tx.execute(
            "INSERT INTO locations (hash, relative_path, filename, mtime_ns)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(relative_path) DO UPDATE SET
                hash = excluded.hash,
                filename = excluded.filename,
                mtime_ns = excluded.mtime_ns",
            (
                &model.hash,
                &model.relative_path,
                &model.filename,
                model.mtime_ns,
            ),
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Stamp `last_seen` for a hash without rehashing anything.
    pub(crate) fn touch(&self, hash: &str, last_seen: i64) -> Result<(), Error> {
        self.conn.execute(
            "UPDATE models SET last_seen = ?1 WHERE hash = ?2",
            (last_seen, hash),
        )?;
        Ok(())
    }

    /// Remove a location; the hash row stays until a scan proves no
    /// location remains.
    pub(crate) fn remove_location(&self, relative_path: &str) -> Result<(), Error> {
        self.conn.execute(
            "DELETE FROM locations WHERE relative_path = ?1",
            (relative_path,),
        )?;
        Ok(())
    }

    /// Drop model rows that no longer have any location.
    pub(crate) fn prune_orphan_models(&self) -> Result<usize, Error> {
        let removed = self.conn.execute(
            "DELETE FROM models WHERE hash NOT IN (SELECT DISTINCT hash FROM locations)",
            (),
        )?;
        if removed > 0 {
            debug!("Pruned {removed} model rows with no remaining location");
        }
        Ok(removed)
    }

    fn query_joined<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<ModelWithLocation>, Error> {
        let mut statement = self.conn.prepare(sql)?;
        let rows = statement.query_map(params, |row| {
            Ok(ModelWithLocation {
                hash: row.get(0)?,
                file_size: row.get::<_, i64>(1)? as u64,
                relative_path: row.get(2)?,
                filename: row.get(3)?,
                mtime_ns: row.get(4)?,
                last_seen: row.get(5)?,
                blake3_hash: row.get(6)?,
                sha256_hash: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample(hash: &str, relative_path: &str) -> ModelWithLocation {
        ModelWithLocation {
            hash: hash.to_string(),
            file_size: 1000,
            relative_path: relative_path.to_string(),
            filename: relative_path.rsplit('/').next().unwrap().to_string(),
            mtime_ns: 1_700_000_000_000_000_000,
            last_seen: 1_700_000_000,
            blake3_hash: None,
            sha256_hash: None,
        }
    }

    #[test]
    fn lookups_by_hash_filename_and_category() -> anyhow::Result<()> {
        let mut repo = ModelRepository::in_memory()?;
        repo.upsert(&sample("aaa111", "checkpoints/sd15.safetensors"))?;
        repo.upsert(&sample("bbb222", "loras/style.safetensors"))?;
        // Same model copied into a second category directory.
        repo.upsert(&sample("aaa111", "loras/sd15.safetensors"))?;

        assert_eq!(repo.find_by_hash("aaa111")?.len(), 2);
        assert_eq!(repo.find_by_filename("sd15.safetensors")?.len(), 2);
        assert_eq!(repo.get_by_category("loras")?.len(), 2);
        assert_eq!(repo.get_by_category("checkpoints")?.len(), 1);
        assert_eq!(repo.get_all()?.len(), 3);
        Ok(())
    }

    #[test]
    fn search_is_a_substring_prefilter() -> anyhow::Result<()> {
        let mut repo = ModelRepository::in_memory()?;
        repo.upsert(&sample("aaa111", "checkpoints/sd15_v1.safetensors"))?;
        repo.upsert(&sample("bbb222", "vae/qwen_image_vae.safetensors"))?;

        let hits = repo.search("qwen")?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].hash, "bbb222");
        Ok(())
    }

    #[test]
    fn sources_are_typed_and_deduplicated() -> anyhow::Result<()> {
        let mut repo = ModelRepository::in_memory()?;
        repo.upsert(&sample("aaa111", "checkpoints/sd15.safetensors"))?;
        repo.add_source("aaa111", "https://huggingface.co/x/y/resolve/main/sd15.safetensors")?;
        repo.add_source("aaa111", "https://huggingface.co/x/y/resolve/main/sd15.safetensors")?;
        repo.add_source("aaa111", "https://civitai.com/api/download/models/42")?;

        let sources = repo.get_sources("aaa111")?;
        assert_eq!(sources.len(), 2);
        assert!(sources
            .iter()
            .any(|source| source.kind == ModelSourceKind::Huggingface));
        assert!(sources
            .iter()
            .any(|source| source.kind == ModelSourceKind::Civitai));
        Ok(())
    }

    #[test]
    fn locations_are_unique_by_relative_path() -> anyhow::Result<()> {
        let mut repo = ModelRepository::in_memory()?;
        repo.upsert(&sample("aaa111", "checkpoints/model.safetensors"))?;
        // A rescan observed different content at the same path.
        repo.upsert(&sample("ccc333", "checkpoints/model.safetensors"))?;

        let locations = repo.get_locations("ccc333")?;
        assert_eq!(locations.len(), 1);
        assert!(repo.get_locations("aaa111")?.is_empty());
        Ok(())
    }
}
