use tracing::{debug, warn};

use comfygit_registry::{input_signature, node_key, type_only_key, RegistryMirror};
use comfygit_types::{CustomNodeMapping, NodeMatchType, ResolvedNodePackage, WorkflowNode};

use crate::context::NodeResolutionContext;

/// Outcome of resolving one node type.
#[derive(Debug)]
pub enum NodeResolution {
    Resolved(ResolvedNodePackage),
    Ambiguous(Vec<ResolvedNodePackage>),
    /// The workflow marks this type as deliberately unresolvable.
    Skip,
    /// No tier produced a candidate; a strategy may prompt.
    Unresolved,
}

/// Resolves node types against the registry mirror.
#[derive(Debug)]
pub struct NodeResolver<'a> {
    mirror: &'a RegistryMirror,
}

impl<'a> NodeResolver<'a> {
    pub fn new(mirror: &'a RegistryMirror) -> Self {
        Self { mirror }
    }

    /// Resolve one node type through the tiers, in order:
    ///
    /// 1. the session cache, 2. the workflow's custom override, 3. the
    /// node's `cnr_id` properties, 4. the registry signature index
    /// (exact, then type-only, then fuzzy), 5. unresolved. Every
    /// successful tier writes the session cache so later occurrences of
    /// the type short-circuit at tier 1.
    pub fn resolve(
        &self,
        node: &WorkflowNode,
        context: &mut NodeResolutionContext,
    ) -> NodeResolution {
        let node_type = node.node_type.as_str();

        // Tier 1: session cache.
        if let Some(package_id) = context.session.get(node_type) {
            debug!("Session cache hit for {node_type}: {package_id}");
            return NodeResolution::Resolved(self.from_package_id(
                package_id,
                node_type,
                NodeMatchType::SessionCache,
            ));
        }

        // Tier 2: the workflow's custom override.
        if let Some(mapping) = context.custom_mappings.get(node_type) {
            return match mapping {
                CustomNodeMapping::Skip => {
                    debug!("Skipping {node_type} (marked unresolvable in the workflow)");
                    NodeResolution::Skip
                }
                CustomNodeMapping::Package(package_id) => {
                    let package_id = package_id.clone();
                    context
                        .session
                        .insert(node_type.to_string(), package_id.clone());
                    debug!("Custom mapping for {node_type}: {package_id}");
                    NodeResolution::Resolved(self.from_package_id(
                        &package_id,
                        node_type,
                        NodeMatchType::CustomMapping,
                    ))
                }
            };
        }

        // Tier 3: provenance the host recorded when the workflow was
        // saved. Only trusted when the package exists in the mirror.
        if let Some(cnr_id) = node.cnr_id() {
            if let Some(package) = self.mirror.package(cnr_id) {
                debug!("Resolved {node_type} from properties: {cnr_id}");
                context
                    .session
                    .insert(node_type.to_string(), cnr_id.to_string());
                return NodeResolution::Resolved(ResolvedNodePackage {
                    package_id: cnr_id.to_string(),
                    package: Some(package.clone()),
                    node_type: node_type.to_string(),
                    versions: node.ver().map(ToString::to_string).into_iter().collect(),
                    match_type: NodeMatchType::Properties,
                    confidence: 1.0,
                });
            }
            warn!("cnr_id {cnr_id} from properties of {node_type} is not in the registry");
        }

        // Tier 4: the registry signature index.
        match self.resolve_from_registry(node) {
            NodeResolution::Resolved(package) => {
                context
                    .session
                    .insert(node_type.to_string(), package.package_id.clone());
                NodeResolution::Resolved(package)
            }
            other => other,
        }
    }

    fn resolve_from_registry(&self, node: &WorkflowNode) -> NodeResolution {
        let node_type = node.node_type.as_str();

        // Exact match on type + input signature.
        if let Some(signature) = input_signature(&node.inputs) {
            let key = node_key(node_type, &signature);
            if let Some(mapping) = self.mirror.signature_lookup(&key) {
                debug!("Exact signature match for {node_type}: {}", mapping.package_id);
                return NodeResolution::Resolved(ResolvedNodePackage {
                    package_id: mapping.package_id.clone(),
                    package: self.mirror.package(&mapping.package_id).cloned(),
                    node_type: node_type.to_string(),
                    versions: mapping.versions.clone(),
                    match_type: NodeMatchType::Exact,
                    confidence: 1.0,
                });
            }
        }

        // Type-only match.
        if let Some(mapping) = self.mirror.signature_lookup(&type_only_key(node_type)) {
            debug!("Type-only match for {node_type}: {}", mapping.package_id);
            return NodeResolution::Resolved(ResolvedNodePackage {
                package_id: mapping.package_id.clone(),
                package: self.mirror.package(&mapping.package_id).cloned(),
                node_type: node_type.to_string(),
                versions: mapping.versions.clone(),
                match_type: NodeMatchType::TypeOnly,
                confidence: 0.9,
            });
        }

        // Fuzzy substring pass over the mapping keys.
        let node_type_lower = node_type.to_lowercase();
        let mut matches: Vec<ResolvedNodePackage> = Vec::new();
        let mut seen_packages: Vec<String> = Vec::new();
        for (key, mapping) in self.mirror.mappings() {
            let mapped_type = key.split("::").next().unwrap_or(key).to_lowercase();
            if mapped_type.contains(&node_type_lower) || node_type_lower.contains(&mapped_type) {
                if seen_packages.contains(&mapping.package_id) {
                    continue;
                }
                seen_packages.push(mapping.package_id.clone());
                matches.push(ResolvedNodePackage {
                    package_id: mapping.package_id.clone(),
                    package: self.mirror.package(&mapping.package_id).cloned(),
                    node_type: node_type.to_string(),
                    versions: mapping.versions.clone(),
                    match_type: NodeMatchType::Fuzzy,
                    confidence: 0.8,
                });
            }
        }
        match matches.len() {
            0 => {
                debug!("No registry match for {node_type}");
                NodeResolution::Unresolved
            }
            1 => NodeResolution::Resolved(matches.remove(0)),
            _ => NodeResolution::Ambiguous(matches),
        }
    }

    fn from_package_id(
        &self,
        package_id: &str,
        node_type: &str,
        match_type: NodeMatchType,
    ) -> ResolvedNodePackage {
        ResolvedNodePackage {
            package_id: package_id.to_string(),
            package: self.mirror.package(package_id).cloned(),
            node_type: node_type.to_string(),
            versions: Vec::new(),
            match_type,
            confidence: 1.0,
        }
    }
}
