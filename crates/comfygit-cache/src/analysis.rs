use std::cell::RefCell;
use std::path::Path;

use rusqlite::{Connection, OptionalExtension};
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use comfygit_types::{ResolutionResult, WorkflowDependencies};

use crate::digest::content_digest;
use crate::Error;

/// A cached analysis, possibly with a stale resolution attached.
#[derive(Debug, Clone)]
pub struct CachedAnalysis {
    pub dependencies: WorkflowDependencies,
    pub resolution: Option<ResolutionResult>,
    /// The workflow is unchanged but the manifest is not: the analysis is
    /// valid, the resolution must be recomputed.
    pub needs_reresolution: bool,
}

#[derive(Debug, Clone)]
struct SessionEntry {
    dependencies: WorkflowDependencies,
    resolution: Option<ResolutionResult>,
    manifest_hash: Option<String>,
}

struct Row {
    workflow_hash: String,
    manifest_hash: Option<String>,
    mtime_ns: i64,
    file_size: i64,
    dependencies: String,
    resolution: Option<String>,
}

/// Persistent cache of workflow analysis and resolution results.
///
/// Two layers: an instance-scoped session map whose key carries the
/// workflow file's mtime (so a rewrite during one process lifetime forces
/// a miss), and a SQLite store shared across processes. The fast path
/// compares (mtime, size) without reading the file; a changed mtime falls
/// back to a content hash and rewrites the index row on a match.
pub struct AnalysisCache {
    conn: Connection,
    session: RefCell<FxHashMap<String, SessionEntry>>,
}

impl std::fmt::Debug for AnalysisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisCache")
            .field("session_entries", &self.session.borrow().len())
            .finish_non_exhaustive()
    }
}

impl AnalysisCache {
    /// Open (or create) the cache database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        if let Some(parent) = path.as_ref().parent() {
            fs_err::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path.as_ref())?)
    }

    /// An in-memory cache, for tests and ephemeral use.
    pub fn in_memory() -> Result<Self, Error> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, Error> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS workflow_analysis (
                env_name TEXT NOT NULL,
                workflow_name TEXT NOT NULL,
                workflow_hash TEXT NOT NULL,
                manifest_hash TEXT,
                mtime_ns INTEGER NOT NULL,
                file_size INTEGER NOT NULL,
                dependencies TEXT NOT NULL,
                resolution TEXT,
                cached_at TEXT NOT NULL,
                PRIMARY KEY (env_name, workflow_name)
            );",
        )?;
        Ok(Self {
            conn,
            session: RefCell::new(FxHashMap::default()),
        })
    }

    /// Look up the cached analysis for a workflow.
    ///
    /// Returns `None` when the workflow content changed (or was never
    /// cached); returns a hit with `needs_reresolution` when the workflow
    /// is unchanged but the manifest is not.
    pub fn get(
        &self,
        env_name: &str,
        workflow_name: &str,
        workflow_path: &Path,
        manifest_path: Option<&Path>,
    ) -> Result<Option<CachedAnalysis>, Error> {
        let Ok(stat) = fs_err::metadata(workflow_path) else {
            return Ok(None);
        };
        let (mtime_ns, file_size) = file_stamp(&stat);
        let manifest_hash = manifest_path.and_then(hash_if_present);

        let session_key = session_key(env_name, workflow_name, mtime_ns);
        if let Some(entry) = self.session.borrow().get(&session_key) {
            debug!("Session cache hit for workflow '{workflow_name}'");
            let needs_reresolution = entry.manifest_hash != manifest_hash;
            return Ok(Some(CachedAnalysis {
                dependencies: entry.dependencies.clone(),
                resolution: entry.resolution.clone(),
                needs_reresolution,
            }));
        }

        let Some(row) = self.load_row(env_name, workflow_name)? else {
            return Ok(None);
        };

        // Fast path: identical (mtime, size) means identical content.
        let content_matches = if row.mtime_ns == mtime_ns && row.file_size == file_size as i64 {
            true
        } else {
            // The file was rewritten; a touch-only change still hits via
            // the content hash, and the row is restamped for next time.
            let bytes = fs_err::read(workflow_path)?;
            if content_digest(&bytes) == row.workflow_hash {
                self.conn.execute(
                    "UPDATE workflow_analysis SET mtime_ns = ?1, file_size = ?2
                     WHERE env_name = ?3 AND workflow_name = ?4",
                    (mtime_ns, file_size as i64, env_name, workflow_name),
                )?;
                true
            } else {
                false
            }
        };

        if !content_matches {
            debug!("Cache miss for workflow '{workflow_name}': content changed");
            return Ok(None);
        }

        let Some((dependencies, resolution)) = self.decode_row(env_name, workflow_name, &row)?
        else {
            return Ok(None);
        };

        let needs_reresolution = row.manifest_hash != manifest_hash;
        self.session.borrow_mut().insert(
            session_key,
            SessionEntry {
                dependencies: dependencies.clone(),
                resolution: resolution.clone(),
                manifest_hash: row.manifest_hash,
            },
        );

        Ok(Some(CachedAnalysis {
            dependencies,
            resolution,
            needs_reresolution,
        }))
    }

    /// Store the analysis (and optional resolution) for a workflow.
    pub fn set(
        &self,
        env_name: &str,
        workflow_name: &str,
        workflow_path: &Path,
        dependencies: &WorkflowDependencies,
        resolution: Option<&ResolutionResult>,
        manifest_path: Option<&Path>,
    ) -> Result<(), Error> {
        let bytes = fs_err::read(workflow_path)?;
        let workflow_hash = content_digest(&bytes);
        let stat = fs_err::metadata(workflow_path)?;
        let (mtime_ns, file_size) = file_stamp(&stat);
        let manifest_hash = manifest_path.and_then(hash_if_present);

        self.conn.execute(
            "INSERT OR REPLACE INTO workflow_analysis
             (env_name, workflow_name, workflow_hash, manifest_hash, mtime_ns, file_size,
              dependencies, resolution, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            (
                env_name,
                workflow_name,
                &workflow_hash,
                manifest_hash.as_deref(),
                mtime_ns,
                file_size as i64,
                serde_json::to_string(dependencies)?,
                resolution.map(serde_json::to_string).transpose()?,
                jiff::Timestamp::now().to_string(),
            ),
        )?;

        self.session.borrow_mut().insert(
            session_key(env_name, workflow_name, mtime_ns),
            SessionEntry {
                dependencies: dependencies.clone(),
                resolution: resolution.cloned(),
                manifest_hash,
            },
        );
        Ok(())
    }

    /// Drop one workflow's entry, or every entry for the environment.
    pub fn invalidate(&self, env_name: &str, workflow_name: Option<&str>) -> Result<(), Error> {
        match workflow_name {
            Some(name) => {
                self.conn.execute(
                    "DELETE FROM workflow_analysis WHERE env_name = ?1 AND workflow_name = ?2",
                    (env_name, name),
                )?;
                let prefix = format!("{env_name}:{name}:");
                self.session
                    .borrow_mut()
                    .retain(|key, _| !key.starts_with(&prefix));
            }
            None => {
                self.conn.execute(
                    "DELETE FROM workflow_analysis WHERE env_name = ?1",
                    (env_name,),
                )?;
                let prefix = format!("{env_name}:");
                self.session
                    .borrow_mut()
                    .retain(|key, _| !key.starts_with(&prefix));
            }
        }
        Ok(())
    }

    /// Number of entries in the instance-scoped session layer.
    pub fn session_len(&self) -> usize {
        self.session.borrow().len()
    }

    fn load_row(&self, env_name: &str, workflow_name: &str) -> Result<Option<Row>, Error> {
        let row = self
            .conn
            .query_row(
                "SELECT workflow_hash, manifest_hash, mtime_ns, file_size, dependencies, resolution
                 FROM workflow_analysis WHERE env_name = ?1 AND workflow_name = ?2",
                (env_name, workflow_name),
                |row| {
                    Ok(Row {
                        workflow_hash: row.get(0)?,
                        manifest_hash: row.get(1)?,
                        mtime_ns: row.get(2)?,
                        file_size: row.get(3)?,
                        dependencies: row.get(4)?,
                        resolution: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Decode the JSON payloads; a corrupt row is dropped and treated as a
    /// miss rather than surfaced.
    fn decode_row(
        &self,
        env_name: &str,
        workflow_name: &str,
        row: &Row,
    ) -> Result<Option<(WorkflowDependencies, Option<ResolutionResult>)>, Error> {
        let dependencies = serde_json::from_str::<WorkflowDependencies>(&row.dependencies);
        let resolution = row
            .resolution
            .as_deref()
            .map(serde_json::from_str::<ResolutionResult>)
            .transpose();
        match (dependencies, resolution) {
            (Ok(dependencies), Ok(resolution)) => Ok(Some((dependencies, resolution))),
            _ => {
                warn!("Dropping corrupt cache entry for workflow '{workflow_name}'");
                self.conn.execute(
                    "DELETE FROM workflow_analysis WHERE env_name = ?1 AND workflow_name = ?2",
                    (env_name, workflow_name),
                )?;
                Ok(None)
            }
        }
    }
}

fn session_key(env_name: &str, workflow_name: &str, mtime_ns: i64) -> String {
    format!("{env_name}:{workflow_name}:{mtime_ns}")
}

fn file_stamp(stat: &std::fs::Metadata) -> (i64, u64) {
    let mtime_ns = stat
        .modified()
        .ok()
        .and_then(|modified| modified.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|duration| duration.as_nanos() as i64)
        .unwrap_or_default();
    (mtime_ns, stat.len())
}

fn hash_if_present(path: &Path) -> Option<String> {
    fs_err::read(path).ok().map(|bytes| content_digest(&bytes))
}
