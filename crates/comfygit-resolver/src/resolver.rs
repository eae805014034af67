use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use comfygit_cache::AnalysisCache;
use comfygit_manifest::ManifestStore;
use comfygit_models::ModelRepository;
use comfygit_registry::{is_git_url, RegistryMirror};
use comfygit_types::{
    Criticality, ManifestModel, ModelMatchType, ModelStatus, NodeMatchType, ResolutionResult,
    ResolvedModel, ResolvedNodePackage, WorkflowDependencies, WorkflowModel, WorkflowNode,
    WorkflowNodeWidgetRef,
};
use comfygit_workflow::{update_workflow_model_paths, ModelPathConfig, WorkflowDocument};

use crate::context::{ModelResolutionContext, NodeResolutionContext};
use crate::model::{ModelResolution, ModelResolver};
use crate::node::{NodeResolution, NodeResolver};
use crate::strategy::{ModelResolutionStrategy, NodeResolutionStrategy};
use crate::Error;

/// Node and model resolution for one environment's workflows.
///
/// Wires the tiered resolvers to the manifest, the model repository, the
/// registry mirror, and the analysis cache; owns the progressive-write
/// fix pass and the batch apply pass.
pub struct WorkflowResolver<'a> {
    manifest: &'a mut ManifestStore,
    repository: &'a ModelRepository,
    mirror: &'a RegistryMirror,
    cache: &'a AnalysisCache,
    config: &'a ModelPathConfig,
    environment_name: String,
}

impl<'a> WorkflowResolver<'a> {
    pub fn new(
        manifest: &'a mut ManifestStore,
        repository: &'a ModelRepository,
        mirror: &'a RegistryMirror,
        cache: &'a AnalysisCache,
        config: &'a ModelPathConfig,
        environment_name: impl Into<String>,
    ) -> Self {
        Self {
            manifest,
            repository,
            mirror,
            cache,
            config,
            environment_name: environment_name.into(),
        }
    }

    /// Normalize a package id: a GitHub URL that maps to a registry
    /// package becomes the registry id, preventing duplicate installs of
    /// the same package under two names.
    pub fn normalize_package_id(&self, package_id: &str) -> String {
        if is_git_url(package_id) {
            if let Some(package) = self.mirror.resolve_github_url(package_id) {
                return package.id.clone();
            }
        }
        package_id.to_string()
    }

    /// Attempt automatic resolution of everything the analysis found.
    ///
    /// Does not modify the manifest; that happens in
    /// [`Self::fix_resolution`] and [`Self::apply_resolution`].
    pub fn resolve_workflow(
        &mut self,
        analysis: &WorkflowDependencies,
    ) -> Result<ResolutionResult, Error> {
        let workflow_name = analysis.workflow_name.clone();
        let mut result = ResolutionResult::new(&workflow_name);

        // The live document, for path-sync checks against what the file
        // holds right now. A missing file downgrades those checks only.
        let workflow = match WorkflowDocument::load(&analysis.workflow_path) {
            Ok(document) => Some(document),
            Err(_) => {
                warn!("Could not load workflow '{workflow_name}' for path sync checks");
                None
            }
        };

        let mut node_context = self.node_context(&workflow_name);
        let node_resolver = NodeResolver::new(self.mirror);

        // One resolution attempt per distinct type; a node carrying
        // provenance is preferred as the representative.
        let mut unique_nodes: IndexMap<String, &WorkflowNode> = IndexMap::new();
        for node in &analysis.non_builtin_nodes {
            match unique_nodes.get_mut(&node.node_type) {
                None => {
                    unique_nodes.insert(node.node_type.clone(), node);
                }
                Some(existing) => {
                    if node.cnr_id().is_some() && existing.cnr_id().is_none() {
                        *existing = node;
                    }
                }
            }
        }
        debug!(
            "Resolving {} unique node types from {} non-builtin nodes",
            unique_nodes.len(),
            analysis.non_builtin_nodes.len()
        );

        for node in unique_nodes.values() {
            match node_resolver.resolve(node, &mut node_context) {
                NodeResolution::Resolved(package) => result.nodes_resolved.push(package),
                NodeResolution::Ambiguous(candidates) => result.nodes_ambiguous.push(candidates),
                NodeResolution::Skip => {}
                NodeResolution::Unresolved => result.nodes_unresolved.push((*node).clone()),
            }
        }

        let model_context = self.model_context(&workflow_name);
        let model_resolver = ModelResolver::new(self.repository, self.config);

        // One decision per (widget_value, node_type) group, however many
        // nodes share the model.
        for (_, refs) in group_refs(&analysis.found_models) {
            let primary = refs[0].clone();
            match model_resolver.resolve(&primary, &model_context)? {
                ModelResolution::Resolved(mut resolved) => {
                    model_resolver.annotate(&mut resolved, workflow.as_ref())?;
                    result.models_resolved.push(resolved);
                }
                ModelResolution::Ambiguous(candidates) => {
                    result.models_ambiguous.push(candidates);
                }
                ModelResolution::Unresolved => result.models_unresolved.push(primary),
            }
        }

        Ok(result)
    }

    /// Fix remaining issues using strategies, writing progressively.
    ///
    /// Every confirmed decision is persisted before the next question is
    /// asked, so an interrupt preserves partial progress and a re-run
    /// resumes where it stopped. The workflow JSON path update is
    /// batched to the end against a single parse.
    pub fn fix_resolution(
        &mut self,
        workflow_path: &Path,
        analysis: &WorkflowDependencies,
        resolution: ResolutionResult,
        node_strategy: Option<&dyn NodeResolutionStrategy>,
        model_strategy: Option<&dyn ModelResolutionStrategy>,
    ) -> Result<ResolutionResult, Error> {
        let workflow_name = resolution.workflow_name.clone();

        let mut nodes_to_add = resolution.nodes_resolved.clone();
        let mut models_to_add = resolution.models_resolved.clone();
        let mut remaining = ResolutionResult::new(&workflow_name);

        match node_strategy {
            None => {
                remaining.nodes_ambiguous = resolution.nodes_ambiguous.clone();
                remaining.nodes_unresolved = resolution.nodes_unresolved.clone();
            }
            Some(strategy) => {
                let node_context = self.node_context(&workflow_name);

                let mut pending: Vec<(String, Vec<ResolvedNodePackage>)> = Vec::new();
                for candidates in &resolution.nodes_ambiguous {
                    if let Some(first) = candidates.first() {
                        pending.push((first.node_type.clone(), candidates.clone()));
                    }
                }
                for node in &resolution.nodes_unresolved {
                    pending.push((node.node_type.clone(), Vec::new()));
                }

                for (node_type, candidates) in pending {
                    let Some(selected) =
                        strategy.resolve_unknown_node(&node_type, &candidates, &node_context)
                    else {
                        debug!("Skipped node type {node_type}");
                        if candidates.is_empty() {
                            remaining.nodes_unresolved.push(WorkflowNode {
                                node_type: node_type.clone(),
                                ..WorkflowNode::default()
                            });
                        } else {
                            remaining.nodes_ambiguous.push(candidates);
                        }
                        continue;
                    };

                    if selected.match_type == NodeMatchType::Optional {
                        self.manifest.workflows().set_custom_node_mapping(
                            &workflow_name,
                            &node_type,
                            None,
                        );
                        self.manifest.save()?;
                        info!("Marked node type '{node_type}' as deliberately unresolvable");
                        continue;
                    }

                    let package_id = selected
                        .package
                        .as_ref()
                        .map(|package| package.id.clone())
                        .unwrap_or_else(|| selected.package_id.clone());
                    if package_id.is_empty() {
                        warn!("No package id for resolved node type '{node_type}'");
                        continue;
                    }
                    let normalized = self.normalize_package_id(&package_id);

                    if selected.match_type.is_user_intervention() {
                        self.manifest.workflows().set_custom_node_mapping(
                            &workflow_name,
                            &node_type,
                            Some(&normalized),
                        );
                    }
                    self.manifest
                        .workflows()
                        .add_node_pack(&workflow_name, &normalized);
                    self.manifest.save()?;
                    info!("Resolved node type {node_type} -> {normalized}");
                    nodes_to_add.push(selected);
                }
            }
        }

        match model_strategy {
            None => {
                remaining.models_ambiguous = resolution.models_ambiguous.clone();
                remaining.models_unresolved = resolution.models_unresolved.clone();
            }
            Some(strategy) => {
                let model_context = self.model_context(&workflow_name);

                // Group ambiguous and missing refs together so one prompt
                // settles every node sharing the model.
                let mut pending: Vec<(WorkflowNodeWidgetRef, Vec<ResolvedModel>)> = Vec::new();
                for candidates in &resolution.models_ambiguous {
                    if let Some(first) = candidates.first() {
                        pending.push((first.reference.clone(), candidates.clone()));
                    }
                }
                for reference in &resolution.models_unresolved {
                    pending.push((reference.clone(), Vec::new()));
                }

                let mut groups: IndexMap<(String, String), Vec<(WorkflowNodeWidgetRef, Vec<ResolvedModel>)>> =
                    IndexMap::new();
                for (reference, candidates) in pending {
                    groups
                        .entry((
                            reference.widget_value.clone(),
                            reference.node_type.clone(),
                        ))
                        .or_default()
                        .push((reference, candidates));
                }

                for ((widget_value, node_type), group) in groups {
                    // The resolution lists carry one primary per group;
                    // recover every sibling reference from the analysis
                    // so the decision applies to all of them.
                    let mut refs: Vec<WorkflowNodeWidgetRef> = analysis
                        .found_models
                        .iter()
                        .filter(|reference| {
                            reference.widget_value == widget_value
                                && reference.node_type == node_type
                        })
                        .cloned()
                        .collect();
                    if refs.is_empty() {
                        refs = group.iter().map(|(reference, _)| reference.clone()).collect();
                    }
                    let (primary, candidates) = &group[0];
                    if refs.len() > 1 {
                        info!(
                            "Deduplicating model '{widget_value}' found in {} nodes",
                            refs.len()
                        );
                    }

                    let Some(resolved) =
                        strategy.resolve_model(primary, candidates, &model_context)
                    else {
                        debug!("Skipped model {widget_value}");
                        remaining.models_unresolved.extend(refs);
                        continue;
                    };

                    self.write_model_resolution_grouped(&workflow_name, &resolved, &refs)?;
                    for reference in refs {
                        models_to_add.push(resolved.for_reference(reference));
                    }

                    if resolved.is_optional {
                        info!("Marked as optional: {widget_value}");
                    } else if let Some(model) = &resolved.resolved {
                        info!("Resolved: {widget_value} -> {}", model.filename);
                    }
                }
            }
        }

        remaining.nodes_resolved = nodes_to_add;
        remaining.models_resolved = models_to_add;

        // Batch update of the workflow JSON, against one parse.
        let counts = update_workflow_model_paths(workflow_path, &remaining, self.config)?;
        if counts.changed() {
            self.cache
                .invalidate(&self.environment_name, Some(&workflow_name))?;
        }

        Ok(remaining)
    }

    /// Apply an auto-resolution wholesale with smart defaults,
    /// reconciling the workflow's manifest sections with the result.
    pub fn apply_resolution(
        &mut self,
        workflow_path: &Path,
        resolution: &ResolutionResult,
    ) -> Result<(), Error> {
        let workflow_name = resolution.workflow_name.clone();

        // An empty resolution over an untracked workflow writes nothing.
        if resolution.issue_count() == 0
            && resolution.nodes_resolved.is_empty()
            && resolution.models_resolved.is_empty()
            && !self.manifest.workflows().contains(&workflow_name)
        {
            return Ok(());
        }

        // Phase 1: node packs and the custom map.
        let mut target_pack_ids: BTreeSet<String> = BTreeSet::new();
        let mut target_types: HashSet<String> = HashSet::new();
        for package in &resolution.nodes_resolved {
            target_types.insert(package.node_type.clone());
            if package.match_type != NodeMatchType::Optional {
                target_pack_ids.insert(self.normalize_package_id(&package.package_id));
            }
        }
        for node in &resolution.nodes_unresolved {
            target_types.insert(node.node_type.clone());
        }
        for candidates in &resolution.nodes_ambiguous {
            if let Some(first) = candidates.first() {
                target_types.insert(first.node_type.clone());
            }
        }

        if target_pack_ids.is_empty() {
            self.manifest.workflows().set_node_packs(&workflow_name, None);
        } else {
            self.manifest
                .workflows()
                .set_node_packs(&workflow_name, Some(&target_pack_ids));
        }
        let stale_mappings: Vec<String> = self
            .manifest
            .workflows()
            .custom_node_map(&workflow_name)
            .keys()
            .filter(|node_type| !target_types.contains(*node_type))
            .cloned()
            .collect();
        for node_type in stale_mappings {
            self.manifest
                .workflows()
                .remove_custom_node_mapping(&workflow_name, &node_type);
        }

        // Phase 2: model entries with smart criticality defaults.
        let existing_by_filename: FxHashMap<String, WorkflowModel> = self
            .manifest
            .workflows()
            .get_workflow_models(&workflow_name)
            .into_iter()
            .map(|model| (model.filename.clone(), model))
            .collect();

        let mut entries: Vec<WorkflowModel> = Vec::new();
        let mut hash_to_refs: IndexMap<String, (ResolvedModel, Vec<WorkflowNodeWidgetRef>)> =
            IndexMap::new();

        for resolved in &resolution.models_resolved {
            if let Some(model) = &resolved.resolved {
                hash_to_refs
                    .entry(model.hash.clone())
                    .or_insert_with(|| (resolved.clone(), Vec::new()))
                    .1
                    .push(resolved.reference.clone());
            } else if resolved.is_download_intent() {
                let category = self
                    .config
                    .category_for_ref(&resolved.reference.node_type, &resolved.reference.widget_value);
                entries.push(WorkflowModel {
                    filename: resolved.reference.widget_value.clone(),
                    category,
                    criticality: Criticality::Flexible,
                    status: ModelStatus::Unresolved,
                    nodes: vec![resolved.reference.clone()],
                    hash: None,
                    sources: resolved.source.clone().into_iter().collect(),
                    relative_path: resolved.target_path.clone(),
                });
            } else if resolved.is_optional {
                let category = self
                    .config
                    .category_for_ref(&resolved.reference.node_type, &resolved.reference.widget_value);
                entries.push(WorkflowModel {
                    filename: resolved.reference.widget_value.clone(),
                    category,
                    criticality: Criticality::Optional,
                    status: ModelStatus::Unresolved,
                    nodes: vec![resolved.reference.clone()],
                    hash: None,
                    sources: vec![],
                    relative_path: None,
                });
            }
        }

        for (hash, (resolved, refs)) in hash_to_refs {
            let Some(model) = &resolved.resolved else {
                continue;
            };
            let category = model.category().to_string();
            let criticality = self.config.default_criticality(&category);
            let sources: Vec<String> = self
                .repository
                .get_sources(&hash)?
                .into_iter()
                .map(|source| source.url)
                .collect();

            // The workflow entry is a lightweight reference; sources live
            // in the global table, keyed by the hash.
            entries.push(WorkflowModel {
                filename: model.filename.clone(),
                category: category.clone(),
                criticality,
                status: ModelStatus::Resolved,
                nodes: refs,
                hash: Some(hash.clone()),
                sources: vec![],
                relative_path: None,
            });
            self.manifest.models().add_model(&ManifestModel {
                hash,
                filename: model.filename.clone(),
                size: model.file_size,
                relative_path: model.relative_path.clone(),
                category,
                sources,
            });
        }

        for reference in &resolution.models_unresolved {
            let category = self
                .config
                .category_for_ref(&reference.node_type, &reference.widget_value);
            let mut criticality = self.config.default_criticality(&category);

            // Prior decisions about this filename survive re-analysis: a
            // recorded download intent keeps its sources and target, and
            // an optional marking stays optional.
            let existing = existing_by_filename.get(&reference.widget_value);
            if let Some(existing) = existing {
                if existing.status == ModelStatus::Unresolved
                    && existing.criticality == Criticality::Optional
                {
                    criticality = Criticality::Optional;
                }
            }
            let (sources, relative_path) = match existing {
                Some(existing) if existing.is_download_intent() => {
                    debug!(
                        "Preserving download intent for '{}'",
                        reference.widget_value
                    );
                    (existing.sources.clone(), existing.relative_path.clone())
                }
                _ => (vec![], None),
            };

            entries.push(WorkflowModel {
                filename: reference.widget_value.clone(),
                category,
                criticality,
                status: ModelStatus::Unresolved,
                nodes: vec![reference.clone()],
                hash: None,
                sources,
                relative_path,
            });
        }

        self.manifest
            .workflows()
            .set_workflow_models(&workflow_name, &entries);

        // Save runs the manifest invariants: stale workflow entries go
        // first, then global-table orphan cleanup.
        self.manifest.save()?;

        // Phase 3: sync resolved paths back into the workflow JSON.
        let counts = update_workflow_model_paths(workflow_path, resolution, self.config)?;
        if counts.changed() {
            self.cache
                .invalidate(&self.environment_name, Some(&workflow_name))?;
        }
        Ok(())
    }

    /// Persist one grouped model decision: the workflow entry carries
    /// every reference in the group, and a clean resolution also updates
    /// the global table row.
    fn write_model_resolution_grouped(
        &mut self,
        workflow_name: &str,
        resolved: &ResolvedModel,
        refs: &[WorkflowNodeWidgetRef],
    ) -> Result<(), Error> {
        let primary = &resolved.reference;
        let category = self
            .config
            .category_for_ref(&primary.node_type, &primary.widget_value);
        let criticality = if resolved.is_optional {
            Criticality::Optional
        } else {
            self.config.default_criticality(&category)
        };

        if resolved.match_type == ModelMatchType::DownloadIntent {
            self.manifest.workflows().add_workflow_model(
                workflow_name,
                &WorkflowModel {
                    filename: primary.widget_value.clone(),
                    category,
                    criticality,
                    status: ModelStatus::Unresolved,
                    nodes: refs.to_vec(),
                    hash: None,
                    sources: resolved.source.clone().into_iter().collect(),
                    relative_path: resolved.target_path.clone(),
                },
            );
            self.manifest.save()?;
            // Re-resolution must see the new intent.
            self.cache
                .invalidate(&self.environment_name, Some(workflow_name))?;
            return Ok(());
        }

        match &resolved.resolved {
            None => {
                // Optional means "the workflow works without it", not
                // "resolved": the entry stays unresolved either way.
                self.manifest.workflows().add_workflow_model(
                    workflow_name,
                    &WorkflowModel {
                        filename: primary.widget_value.clone(),
                        category,
                        criticality,
                        status: ModelStatus::Unresolved,
                        nodes: refs.to_vec(),
                        hash: None,
                        sources: vec![],
                        relative_path: None,
                    },
                );
            }
            Some(model) => {
                let sources: Vec<String> = self
                    .repository
                    .get_sources(&model.hash)?
                    .into_iter()
                    .map(|source| source.url)
                    .collect();
                self.manifest.workflows().add_workflow_model(
                    workflow_name,
                    &WorkflowModel {
                        filename: model.filename.clone(),
                        category: category.clone(),
                        criticality,
                        status: ModelStatus::Resolved,
                        nodes: refs.to_vec(),
                        hash: Some(model.hash.clone()),
                        sources: sources.clone(),
                        relative_path: None,
                    },
                );
                self.manifest.models().add_model(&ManifestModel {
                    hash: model.hash.clone(),
                    filename: model.filename.clone(),
                    size: model.file_size,
                    relative_path: model.relative_path.clone(),
                    category,
                    sources,
                });
            }
        }
        self.manifest.save()?;
        Ok(())
    }

    fn node_context(&mut self, workflow_name: &str) -> NodeResolutionContext {
        let mut context = NodeResolutionContext::new(workflow_name);
        context.installed_packages = self.manifest.nodes().get_existing();
        context.custom_mappings = self.manifest.workflows().custom_node_map(workflow_name);
        context
    }

    fn model_context(&mut self, workflow_name: &str) -> ModelResolutionContext {
        let mut context = ModelResolutionContext::new(workflow_name);
        for entry in self.manifest.workflows().get_workflow_models(workflow_name) {
            for reference in &entry.nodes {
                context
                    .previous_resolutions
                    .insert(reference.widget_value.clone(), entry.clone());
            }
            context
                .previous_resolutions
                .entry(entry.filename.clone())
                .or_insert_with(|| entry.clone());
        }
        for model in self.manifest.models().get_all() {
            context.global_models.insert(model.hash.clone(), model);
        }
        context
    }
}

/// Group references by `(widget_value, node_type)`, preserving encounter
/// order of both groups and members.
fn group_refs(
    refs: &[WorkflowNodeWidgetRef],
) -> IndexMap<(String, String), Vec<WorkflowNodeWidgetRef>> {
    let mut groups: IndexMap<(String, String), Vec<WorkflowNodeWidgetRef>> = IndexMap::new();
    for reference in refs {
        groups
            .entry((reference.widget_value.clone(), reference.node_type.clone()))
            .or_default()
            .push(reference.clone());
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_preserves_encounter_order() {
        let reference = |node_id: &str, widget_value: &str| WorkflowNodeWidgetRef {
            node_id: node_id.to_string(),
            node_type: "VAELoader".to_string(),
            widget_index: 0,
            widget_value: widget_value.to_string(),
        };
        let groups = group_refs(&[
            reference("39", "qwen_image_vae.safetensors"),
            reference("12", "other_vae.safetensors"),
            reference("337", "qwen_image_vae.safetensors"),
        ]);
        assert_eq!(groups.len(), 2);
        let first = groups.get_index(0).unwrap();
        assert_eq!(first.1.len(), 2);
        assert_eq!(first.1[0].node_id, "39");
        assert_eq!(first.1[1].node_id, "337");
    }
}
