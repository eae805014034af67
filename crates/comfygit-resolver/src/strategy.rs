use comfygit_types::{ResolvedModel, ResolvedNodePackage, WorkflowNodeWidgetRef};

use crate::context::{ModelResolutionContext, NodeResolutionContext};

/// Policy for unknown or ambiguous node types.
///
/// Implementors live outside the core (interactive prompts, web UIs);
/// the core ships [`AutoResolver`] and [`NoOpResolver`] for headless use
/// and tests. Returning `None` is a legitimate "leave unresolved", not
/// an error; returning a package with `match_type = Optional` records a
/// deliberate skip.
pub trait NodeResolutionStrategy {
    fn resolve_unknown_node(
        &self,
        node_type: &str,
        candidates: &[ResolvedNodePackage],
        context: &NodeResolutionContext,
    ) -> Option<ResolvedNodePackage>;
}

/// Policy for ambiguous or missing model references.
///
/// May return a candidate, an optional-unresolved marking
/// (`resolved = None`, `is_optional = true`), or a download intent
/// (`match_type = DownloadIntent` with `target_path` and `source`).
pub trait ModelResolutionStrategy {
    fn resolve_model(
        &self,
        reference: &WorkflowNodeWidgetRef,
        candidates: &[ResolvedModel],
        context: &ModelResolutionContext,
    ) -> Option<ResolvedModel>;
}

/// What to do with one conflicting entry during a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictChoice {
    TakeBase,
    TakeTarget,
    Skip,
}

/// Policy for three-way merge conflicts, one method per conflict kind.
pub trait ConflictResolver {
    fn resolve_workflow_conflict(&self, name: &str) -> ConflictChoice;
    fn resolve_node_conflict(&self, package_id: &str) -> ConflictChoice;
    fn resolve_dependency_conflict(&self, name: &str) -> ConflictChoice;
}

/// Always picks the strongest candidate; never prompts.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoResolver;

impl NodeResolutionStrategy for AutoResolver {
    fn resolve_unknown_node(
        &self,
        _node_type: &str,
        candidates: &[ResolvedNodePackage],
        _context: &NodeResolutionContext,
    ) -> Option<ResolvedNodePackage> {
        // Highest confidence wins; first wins a tie.
        candidates
            .iter()
            .fold(None::<&ResolvedNodePackage>, |best, candidate| match best {
                Some(best) if best.confidence >= candidate.confidence => Some(best),
                _ => Some(candidate),
            })
            .cloned()
    }
}

impl ModelResolutionStrategy for AutoResolver {
    fn resolve_model(
        &self,
        _reference: &WorkflowNodeWidgetRef,
        candidates: &[ResolvedModel],
        _context: &ModelResolutionContext,
    ) -> Option<ResolvedModel> {
        candidates.first().cloned()
    }
}

impl ConflictResolver for AutoResolver {
    fn resolve_workflow_conflict(&self, _name: &str) -> ConflictChoice {
        ConflictChoice::TakeTarget
    }

    fn resolve_node_conflict(&self, _package_id: &str) -> ConflictChoice {
        ConflictChoice::TakeTarget
    }

    fn resolve_dependency_conflict(&self, _name: &str) -> ConflictChoice {
        ConflictChoice::TakeTarget
    }
}

/// Leaves everything unresolved; the headless default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpResolver;

impl NodeResolutionStrategy for NoOpResolver {
    fn resolve_unknown_node(
        &self,
        _node_type: &str,
        _candidates: &[ResolvedNodePackage],
        _context: &NodeResolutionContext,
    ) -> Option<ResolvedNodePackage> {
        None
    }
}

impl ModelResolutionStrategy for NoOpResolver {
    fn resolve_model(
        &self,
        _reference: &WorkflowNodeWidgetRef,
        _candidates: &[ResolvedModel],
        _context: &ModelResolutionContext,
    ) -> Option<ResolvedModel> {
        None
    }
}
