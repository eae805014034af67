use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use comfygit_cache::AnalysisCache;
use comfygit_manifest::ManifestStore;
use comfygit_models::ModelRepository;
use comfygit_registry::RegistryMirror;
use comfygit_resolver::{
    ModelResolutionStrategy, NodeResolutionStrategy, WorkflowResolver,
};
use comfygit_sync::{reconcile_nodes, sync_model_paths, NodeSyncPolicy, PlannedInstall};
use comfygit_torch::{BackendFile, TorchConfig};
use comfygit_types::{
    ResolutionResult, SyncResult, WorkflowDependencies, WorkflowSyncStatus,
};
use comfygit_workflow::{
    classify_nodes, extract_model_refs, ModelPathConfig, WorkflowDocument, WorkflowSync,
};

use crate::status::{EnvironmentStatus, WorkflowAnalysisStatus};
use crate::Error;

/// Where an environment's pieces live.
#[derive(Debug, Clone)]
pub struct EnvironmentOptions {
    pub name: String,
    /// The environment root: contains `ComfyUI/` and `.cec/`.
    pub root: PathBuf,
    /// The shared models root the repository indexes.
    pub models_root: PathBuf,
    /// The SQLite model index.
    pub model_index_db: PathBuf,
    /// The SQLite workflow-analysis cache.
    pub analysis_cache_db: PathBuf,
    /// The prepared node-mapping data file, if available.
    pub node_mappings_path: Option<PathBuf>,
}

/// One reproducible environment: ComfyUI checkout + manifest + caches.
///
/// The single-writer discipline applies per environment: one
/// `Environment` owns its manifest and drives all mutations.
pub struct Environment {
    name: String,
    comfyui_path: PathBuf,
    cec_path: PathBuf,
    models_root: PathBuf,
    manifest: ManifestStore,
    repository: ModelRepository,
    mirror: RegistryMirror,
    cache: AnalysisCache,
    config: ModelPathConfig,
    workflow_sync: WorkflowSync,
    backend_file: BackendFile,
}

impl Environment {
    /// Open an existing environment, or initialize a fresh manifest when
    /// none exists yet.
    pub fn open(options: EnvironmentOptions) -> Result<Self, Error> {
        let comfyui_path = options.root.join("ComfyUI");
        let cec_path = options.root.join(".cec");
        fs_err::create_dir_all(&cec_path)?;

        let manifest_path = cec_path.join("pyproject.toml");
        let manifest = if manifest_path.exists() {
            ManifestStore::load(&manifest_path)?
        } else {
            ManifestStore::init(&manifest_path, &options.name, "3.12", "unknown")?
        };

        let mirror = match &options.node_mappings_path {
            Some(path) => RegistryMirror::load(path)?,
            None => RegistryMirror::default(),
        };

        Ok(Self {
            name: options.name,
            workflow_sync: WorkflowSync::new(&comfyui_path, &cec_path)?,
            backend_file: BackendFile::new(&cec_path),
            comfyui_path,
            cec_path,
            models_root: options.models_root,
            manifest,
            repository: ModelRepository::open(&options.model_index_db)?,
            mirror,
            cache: AnalysisCache::open(&options.analysis_cache_db)?,
            config: ModelPathConfig::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn comfyui_path(&self) -> &Path {
        &self.comfyui_path
    }

    pub fn cec_path(&self) -> &Path {
        &self.cec_path
    }

    pub fn custom_nodes_path(&self) -> PathBuf {
        self.comfyui_path.join("custom_nodes")
    }

    pub fn manifest(&mut self) -> &mut ManifestStore {
        &mut self.manifest
    }

    pub fn repository(&mut self) -> &mut ModelRepository {
        &mut self.repository
    }

    pub fn workflow_path(&self, name: &str) -> Result<PathBuf, Error> {
        Ok(self.workflow_sync.workflow_path(name)?)
    }

    /// Analyze a single workflow, through the cache.
    pub fn analyze_workflow(&mut self, name: &str) -> Result<WorkflowDependencies, Error> {
        let workflow_path = self.workflow_sync.workflow_path(name)?;

        if let Some(cached) = self.cache.get(
            &self.name,
            name,
            &workflow_path,
            Some(self.manifest.path()),
        )? {
            debug!("Cache hit for workflow '{name}'");
            return Ok(cached.dependencies);
        }
        debug!("Cache miss for workflow '{name}'; running full analysis");

        let dependencies = self.parse_workflow(name, &workflow_path)?;
        self.cache.set(
            &self.name,
            name,
            &workflow_path,
            &dependencies,
            None,
            Some(self.manifest.path()),
        )?;
        Ok(dependencies)
    }

    /// Analyze and resolve with full caching: a content hit with a stale
    /// manifest reuses the analysis and re-resolves only.
    pub fn analyze_and_resolve(
        &mut self,
        name: &str,
    ) -> Result<(WorkflowDependencies, ResolutionResult), Error> {
        let workflow_path = self.workflow_sync.workflow_path(name)?;

        let cached = self.cache.get(
            &self.name,
            name,
            &workflow_path,
            Some(self.manifest.path()),
        )?;
        if let Some(cached) = &cached {
            if !cached.needs_reresolution {
                if let Some(resolution) = &cached.resolution {
                    debug!("Full cache hit for workflow '{name}'");
                    return Ok((cached.dependencies.clone(), resolution.clone()));
                }
            }
        }

        let dependencies = match cached {
            Some(cached) => {
                debug!("Partial cache hit for workflow '{name}'; re-resolving");
                cached.dependencies
            }
            None => self.parse_workflow(name, &workflow_path)?,
        };

        let resolution = self.resolver().resolve_workflow(&dependencies)?;
        self.cache.set(
            &self.name,
            name,
            &workflow_path,
            &dependencies,
            Some(&resolution),
            Some(self.manifest.path()),
        )?;
        Ok((dependencies, resolution))
    }

    /// Fix remaining issues with strategies; every confirmed decision is
    /// written before the next prompt.
    pub fn fix_workflow(
        &mut self,
        name: &str,
        node_strategy: Option<&dyn NodeResolutionStrategy>,
        model_strategy: Option<&dyn ModelResolutionStrategy>,
    ) -> Result<ResolutionResult, Error> {
        let workflow_path = self.workflow_sync.workflow_path(name)?;
        let (dependencies, resolution) = self.analyze_and_resolve(name)?;

        let name_owned = self.name.clone();
        let mut resolver = WorkflowResolver::new(
            &mut self.manifest,
            &self.repository,
            &self.mirror,
            &self.cache,
            &self.config,
            name_owned,
        );
        Ok(resolver.fix_resolution(
            &workflow_path,
            &dependencies,
            resolution,
            node_strategy,
            model_strategy,
        )?)
    }

    /// Resolve and record a workflow in the manifest (the commit path).
    pub fn commit_workflow(&mut self, name: &str) -> Result<ResolutionResult, Error> {
        let workflow_path = self.workflow_sync.workflow_path(name)?;
        // The committed copy must exist before the manifest save runs its
        // missing-file invariant.
        let committed = self
            .workflow_sync
            .committed_dir()
            .join(format!("{name}.json"));
        fs_err::copy(&workflow_path, &committed)?;

        let (_, resolution) = self.analyze_and_resolve(name)?;
        self.resolver()
            .apply_resolution(&workflow_path, &resolution)?;
        Ok(resolution)
    }

    /// Detailed status across every workflow. A single workflow's
    /// failure is reported in the aggregate, never fatal.
    pub fn status(&mut self) -> EnvironmentStatus {
        let sync_status = self.workflow_sync.status();
        let installed: Vec<String> = self
            .manifest
            .nodes()
            .get_existing()
            .keys()
            .cloned()
            .collect();

        let mut status = EnvironmentStatus {
            sync_status: sync_status.clone(),
            ..EnvironmentStatus::default()
        };

        let mut names: Vec<(String, &str)> = Vec::new();
        names.extend(sync_status.new.iter().cloned().map(|name| (name, "new")));
        names.extend(
            sync_status
                .modified
                .iter()
                .cloned()
                .map(|name| (name, "modified")),
        );
        names.extend(
            sync_status
                .synced
                .iter()
                .cloned()
                .map(|name| (name, "synced")),
        );

        for (name, state) in names {
            match self.analyze_and_resolve(&name) {
                Ok((dependencies, resolution)) => {
                    let uninstalled_nodes: Vec<String> = resolution
                        .nodes_resolved
                        .iter()
                        .map(|package| package.package_id.clone())
                        .filter(|package_id| !installed.contains(package_id))
                        .collect();
                    status.analyzed_workflows.push(WorkflowAnalysisStatus {
                        name,
                        sync_state: state.to_string(),
                        dependencies,
                        resolution,
                        uninstalled_nodes,
                    });
                }
                Err(err) => {
                    error!("Failed to analyze workflow {name}: {err}");
                    status.errored_workflows.push((name, err.to_string()));
                }
            }
        }
        status
    }

    /// Reconcile the filesystem with the manifest.
    ///
    /// Node installs are planned and returned alongside the result;
    /// executing them (downloads, clones) is the caller's concern.
    pub fn sync(&mut self, policy: NodeSyncPolicy) -> (SyncResult, Vec<PlannedInstall>) {
        let mut result = SyncResult::new();

        let manifest_nodes = self.manifest.nodes().get_existing();
        let planned = match reconcile_nodes(
            &manifest_nodes,
            &self.custom_nodes_path(),
            policy,
            &mut result,
        ) {
            Ok(planned) => planned,
            Err(err) => {
                result.record_error(true, format!("node reconciliation failed: {err}"));
                Vec::new()
            }
        };

        match sync_model_paths(&self.comfyui_path, &self.models_root) {
            Ok(status) => {
                result.model_paths_configured = true;
                if status.updated {
                    info!(
                        "Model path configuration updated ({} directories)",
                        status.total_directories
                    );
                }
            }
            Err(err) => {
                result.record_error(false, format!("model path configuration failed: {err}"));
            }
        }

        (result, planned)
    }

    /// Copy workflows into the committed set, invalidating caches for
    /// the ones that actually changed.
    pub fn commit_workflow_files(&mut self) -> Result<WorkflowSyncStatus, Error> {
        let before = self.workflow_sync.status();
        for name in before.modified.iter().chain(before.deleted.iter()) {
            self.cache.invalidate(&self.name, Some(name))?;
        }
        self.workflow_sync.copy_all();
        Ok(before)
    }

    /// Restore committed workflows into the host, preserving uncommitted
    /// work when asked.
    pub fn restore_workflow_files(&mut self, preserve_uncommitted: bool) -> Result<(), Error> {
        self.workflow_sync.restore_all(preserve_uncommitted);
        self.cache.invalidate(&self.name, None)?;
        Ok(())
    }

    /// The backend-specific Python configuration. Fails with
    /// `BackendMissing` when no `.pytorch-backend` pin exists.
    pub fn torch_config(&self) -> Result<TorchConfig, Error> {
        let backend = self.backend_file.read()?;
        let python_version = self.manifest.python_version().map(ToString::to_string);
        Ok(TorchConfig::for_backend(
            &backend,
            python_version.as_deref(),
            self.cec_path.parent(),
        )?)
    }

    pub fn backend_file(&self) -> &BackendFile {
        &self.backend_file
    }

    fn parse_workflow(
        &self,
        name: &str,
        workflow_path: &Path,
    ) -> Result<WorkflowDependencies, Error> {
        let document = WorkflowDocument::load(workflow_path)?;
        let classification = classify_nodes(&document);
        let found_models = extract_model_refs(&document, &self.config);
        Ok(WorkflowDependencies {
            workflow_name: name.to_string(),
            workflow_path: workflow_path.to_path_buf(),
            builtin_nodes: classification.builtin_nodes,
            non_builtin_nodes: classification.non_builtin_nodes,
            found_models,
        })
    }

    fn resolver(&mut self) -> WorkflowResolver<'_> {
        WorkflowResolver::new(
            &mut self.manifest,
            &self.repository,
            &self.mirror,
            &self.cache,
            &self.config,
            self.name.clone(),
        )
    }
}
