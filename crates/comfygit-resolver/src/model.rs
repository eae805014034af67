use tracing::debug;

use comfygit_models::ModelRepository;
use comfygit_types::{
    CategoryMismatch, ModelMatchType, ModelWithLocation, ResolvedModel, WorkflowNodeWidgetRef,
};
use comfygit_workflow::{ModelPathConfig, WorkflowDocument};

use crate::context::ModelResolutionContext;
use crate::Error;

/// Outcome of resolving one model reference group.
#[derive(Debug)]
pub enum ModelResolution {
    Resolved(ResolvedModel),
    Ambiguous(Vec<ResolvedModel>),
    Unresolved,
}

/// Resolves model references against the repository index.
#[derive(Debug)]
pub struct ModelResolver<'a> {
    repository: &'a ModelRepository,
    config: &'a ModelPathConfig,
}

impl<'a> ModelResolver<'a> {
    pub fn new(repository: &'a ModelRepository, config: &'a ModelPathConfig) -> Self {
        Self { repository, config }
    }

    /// Resolve one reference through the tiers, in order: manifest reuse
    /// (including preserved download intents), exact path, reconstructed
    /// loader path, case-insensitive path, filename-only.
    pub fn resolve(
        &self,
        reference: &WorkflowNodeWidgetRef,
        context: &ModelResolutionContext,
    ) -> Result<ModelResolution, Error> {
        let widget_value = reference.widget_value.as_str();

        // Tier 0: a previous manifest entry for this widget value.
        if let Some(previous) = context.previous_resolutions.get(widget_value) {
            if let Some(hash) = &previous.hash {
                let mut matches = self.repository.find_by_hash(hash)?;
                if !matches.is_empty() {
                    debug!("Reused manifest resolution for {widget_value}: {hash}");
                    return Ok(ModelResolution::Resolved(self.resolved(
                        reference,
                        matches.remove(0),
                        ModelMatchType::Manifest,
                        1.0,
                    )));
                }
                debug!("Manifest hash {hash} for {widget_value} is no longer in the index");
            } else if previous.is_download_intent() {
                debug!("Preserving download intent for {widget_value}");
                return Ok(ModelResolution::Resolved(ResolvedModel {
                    reference: reference.clone(),
                    resolved: None,
                    source: previous.sources.first().cloned(),
                    is_optional: false,
                    match_type: ModelMatchType::DownloadIntent,
                    confidence: 1.0,
                    target_path: previous.relative_path.clone(),
                    needs_path_sync: false,
                    category_mismatch: None,
                }));
            }
        }

        // Tier 1: the widget value is already a full relative path.
        let all = self.repository.get_all()?;
        let exact: Vec<&ModelWithLocation> = all
            .iter()
            .filter(|model| model.relative_path == widget_value)
            .collect();
        match exact.len() {
            1 => {
                return Ok(ModelResolution::Resolved(self.resolved(
                    reference,
                    exact[0].clone(),
                    ModelMatchType::Exact,
                    1.0,
                )));
            }
            count if count > 1 => {
                return Ok(self.ambiguous(reference, exact, ModelMatchType::Exact));
            }
            _ => {}
        }

        // Tier 2: prepend the loader's base directories.
        if self.config.is_model_loader_node(&reference.node_type) {
            for candidate in self
                .config
                .reconstruct_model_path(&reference.node_type, widget_value)
            {
                let reconstructed: Vec<&ModelWithLocation> = all
                    .iter()
                    .filter(|model| model.relative_path == candidate)
                    .collect();
                if reconstructed.len() == 1 {
                    return Ok(ModelResolution::Resolved(self.resolved(
                        reference,
                        reconstructed[0].clone(),
                        ModelMatchType::Reconstructed,
                        0.9,
                    )));
                }
            }
        }

        // Tier 3: case-insensitive path match.
        let lower = widget_value.to_lowercase();
        let case_insensitive: Vec<&ModelWithLocation> = all
            .iter()
            .filter(|model| model.relative_path.to_lowercase() == lower)
            .collect();
        if case_insensitive.len() == 1 {
            return Ok(ModelResolution::Resolved(self.resolved(
                reference,
                case_insensitive[0].clone(),
                ModelMatchType::CaseInsensitive,
                0.8,
            )));
        }

        // Tier 4: filename only.
        let filename = widget_value.rsplit(['/', '\\']).next().unwrap_or(widget_value);
        let mut by_filename = self.repository.find_by_filename(filename)?;
        match by_filename.len() {
            0 => {
                debug!("No index match for {widget_value}");
                Ok(ModelResolution::Unresolved)
            }
            1 => Ok(ModelResolution::Resolved(self.resolved(
                reference,
                by_filename.remove(0),
                ModelMatchType::Filename,
                0.7,
            ))),
            _ => Ok(self.ambiguous(
                reference,
                by_filename.iter().collect(),
                ModelMatchType::Filename,
            )),
        }
    }

    /// Annotate a clean resolution with path-sync and category findings.
    pub fn annotate(
        &self,
        resolved: &mut ResolvedModel,
        workflow: Option<&WorkflowDocument>,
    ) -> Result<(), Error> {
        if resolved.resolved.is_none() {
            return Ok(());
        }
        if let Some(workflow) = workflow {
            resolved.needs_path_sync = self.needs_path_sync(resolved, workflow)?;
        }
        resolved.category_mismatch = self.category_mismatch(resolved)?;
        Ok(())
    }

    /// Does the workflow JSON hold a different path than the resolved
    /// location? Only meaningful for builtin loaders; a current path that
    /// resolves to the same hash (a duplicate copy) does not need sync.
    fn needs_path_sync(
        &self,
        resolved: &ResolvedModel,
        workflow: &WorkflowDocument,
    ) -> Result<bool, Error> {
        let reference = &resolved.reference;
        let Some(model) = &resolved.resolved else {
            return Ok(false);
        };
        if !self.config.is_model_loader_node(&reference.node_type) {
            return Ok(false);
        }
        // Read the value as the document holds it now; the reference may
        // be from an earlier parse.
        let current = workflow
            .node(&reference.node_id)
            .and_then(|node| node.widgets_values.get(reference.widget_index))
            .and_then(|widget| widget.as_text())
            .unwrap_or(reference.widget_value.as_str())
            .replace('\\', "/");

        let expected = self
            .config
            .strip_base_directory(&reference.node_type, &model.relative_path);
        if current == expected {
            return Ok(false);
        }

        // The current path may point at another copy of the same model.
        let all = self.repository.get_all()?;
        for candidate in self
            .config
            .reconstruct_model_path(&reference.node_type, &current)
            .into_iter()
            .chain([current.clone()])
        {
            if all
                .iter()
                .any(|other| other.relative_path == candidate && other.hash == model.hash)
            {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// A resolved model whose every location sits outside the loader's
    /// allowed directories cannot be loaded by the host. Informational;
    /// never auto-fixed.
    fn category_mismatch(
        &self,
        resolved: &ResolvedModel,
    ) -> Result<Option<CategoryMismatch>, Error> {
        let reference = &resolved.reference;
        let Some(model) = &resolved.resolved else {
            return Ok(None);
        };
        if !self.config.is_model_loader_node(&reference.node_type) {
            return Ok(None);
        }
        let expected = self.config.directories_for_node(&reference.node_type);
        if expected.is_empty() {
            return Ok(None);
        }

        let actual = model.category().to_string();
        if expected.contains(&actual.as_str()) {
            return Ok(None);
        }
        // The user may have copied (not moved) the file; any location in
        // an allowed directory satisfies the loader.
        for location in self.repository.get_locations(&model.hash)? {
            if expected.contains(&location.category()) {
                return Ok(None);
            }
        }
        Ok(Some(CategoryMismatch {
            expected: expected.iter().map(ToString::to_string).collect(),
            actual: Some(actual),
        }))
    }

    fn resolved(
        &self,
        reference: &WorkflowNodeWidgetRef,
        model: ModelWithLocation,
        match_type: ModelMatchType,
        confidence: f64,
    ) -> ResolvedModel {
        ResolvedModel {
            reference: reference.clone(),
            resolved: Some(model),
            source: None,
            is_optional: false,
            match_type,
            confidence,
            target_path: None,
            needs_path_sync: false,
            category_mismatch: None,
        }
    }

    fn ambiguous(
        &self,
        reference: &WorkflowNodeWidgetRef,
        candidates: Vec<&ModelWithLocation>,
        match_type: ModelMatchType,
    ) -> ModelResolution {
        ModelResolution::Ambiguous(
            candidates
                .into_iter()
                .map(|model| self.resolved(reference, model.clone(), match_type, 0.0))
                .collect(),
        )
    }
}
