//! TP-004: Type inheritance flattening.
//!
//! Each of the six type kinds resolves its `derived_from` chain into one merged
//! definition. Merging is explicit per kind (`Inheritable::merge_over`):
//! scalars take the child's non-empty value, maps merge key by key with the
//! child winning, and ancestry lists are unioned child-first without dedup.
//! The chain of names being resolved is tracked so a derivation cycle fails
//! fast instead of recursing forever.

use super::assignment::{Assignment, Value};
use super::attributes::{AttributeStore, ComponentKind};
use super::error::{Result, TopologyError, TypeKind};
use super::types::*;
use indexmap::IndexMap;
use serde::Serialize;

// ============================================================================
// Merge primitives
// ============================================================================

fn pick<T: Clone>(child: &Option<T>, parent: Option<T>) -> Option<T> {
    child.clone().or(parent)
}

fn pick_str(child: &Option<String>, parent: Option<String>) -> Option<String> {
    match child {
        Some(s) if !s.is_empty() => Some(s.clone()),
        _ => parent,
    }
}

fn pick_vec<T: Clone>(child: &[T], parent: Vec<T>) -> Vec<T> {
    if child.is_empty() {
        parent
    } else {
        child.to_vec()
    }
}

/// Child entries followed by the parent's, duplicates kept.
fn union_child_first<T: Clone>(child: &[T], parent: Vec<T>) -> Vec<T> {
    let mut out = child.to_vec();
    out.extend(parent);
    out
}

/// Parent key order is kept; child keys override in place or append.
fn merge_map<V: Clone>(
    child: &IndexMap<String, V>,
    mut parent: IndexMap<String, V>,
    merge: impl Fn(&V, V) -> V,
) -> IndexMap<String, V> {
    for (key, value) in child {
        let merged = match parent.get(key) {
            Some(inherited) => merge(value, inherited.clone()),
            None => value.clone(),
        };
        parent.insert(key.clone(), merged);
    }
    parent
}

fn replace<V: Clone>(child: &V, _parent: V) -> V {
    child.clone()
}

impl PropertyDefinition {
    pub fn merge_over(&self, parent: Self) -> Self {
        Self {
            type_name: pick_str(&self.type_name, parent.type_name),
            description: pick_str(&self.description, parent.description),
            required: pick(&self.required, parent.required),
            default: pick(&self.default, parent.default),
            status: pick_str(&self.status, parent.status),
            constraints: pick_vec(&self.constraints, parent.constraints),
            entry_schema: pick(&self.entry_schema, parent.entry_schema),
        }
    }
}

impl CapabilityDefinition {
    pub fn merge_over(&self, parent: Self) -> Self {
        Self {
            type_name: pick_str(&self.type_name, parent.type_name),
            description: pick_str(&self.description, parent.description),
            properties: merge_map(&self.properties, parent.properties, PropertyDefinition::merge_over),
            attributes: merge_map(&self.attributes, parent.attributes, PropertyDefinition::merge_over),
            valid_source_types: union_child_first(&self.valid_source_types, parent.valid_source_types),
            occurrences: pick_vec(&self.occurrences, parent.occurrences),
        }
    }

    /// Fill in what the capability's type declares. The type's source list
    /// applies only when the definition names none.
    pub fn link_type(&self, capability_type: &CapabilityType) -> Self {
        let mut linked = CapabilityDefinition::from(capability_type);
        let sources = std::mem::take(&mut linked.valid_source_types);
        let mut merged = self.merge_over(linked);
        merged.valid_source_types = pick_vec(&self.valid_source_types, sources);
        merged
    }
}

impl OperationDefinition {
    pub fn merge_over(&self, parent: Self) -> Self {
        Self {
            description: pick_str(&self.description, parent.description),
            implementation: pick(&self.implementation, parent.implementation),
            inputs: merge_map(&self.inputs, parent.inputs, replace),
        }
    }
}

impl InterfaceDefinition {
    pub fn merge_over(&self, parent: Self) -> Self {
        Self {
            type_name: pick_str(&self.type_name, parent.type_name),
            description: pick_str(&self.description, parent.description),
            inputs: merge_map(&self.inputs, parent.inputs, replace),
            operations: merge_map(&self.operations, parent.operations, OperationDefinition::merge_over),
        }
    }
}

impl From<&InterfaceType> for InterfaceDefinition {
    fn from(t: &InterfaceType) -> Self {
        Self {
            type_name: None,
            description: t.description.clone(),
            inputs: t.inputs.clone(),
            operations: t.operations.clone(),
        }
    }
}

impl From<&CapabilityType> for CapabilityDefinition {
    fn from(t: &CapabilityType) -> Self {
        Self {
            type_name: None,
            description: t.description.clone(),
            properties: t.properties.clone(),
            attributes: t.attributes.clone(),
            valid_source_types: t.valid_source_types.clone(),
            occurrences: Vec::new(),
        }
    }
}

// ============================================================================
// Per-kind inheritance
// ============================================================================

/// A type that inherits from at most one parent by name.
pub trait Inheritable: Clone {
    const KIND: TypeKind;

    fn parent(&self) -> Option<&str>;

    fn clear_parent(&mut self);

    /// Overlay `self` onto its already flattened parent.
    fn merge_over(&self, parent: Self) -> Self;
}

impl Inheritable for NodeType {
    const KIND: TypeKind = TypeKind::Node;

    fn parent(&self) -> Option<&str> {
        self.derived_from.as_deref()
    }

    fn clear_parent(&mut self) {
        self.derived_from = None;
    }

    fn merge_over(&self, parent: Self) -> Self {
        Self {
            derived_from: self.derived_from.clone(),
            version: pick_str(&self.version, parent.version),
            description: pick_str(&self.description, parent.description),
            properties: merge_map(&self.properties, parent.properties, PropertyDefinition::merge_over),
            attributes: merge_map(&self.attributes, parent.attributes, PropertyDefinition::merge_over),
            requirements: union_child_first(&self.requirements, parent.requirements),
            capabilities: merge_map(&self.capabilities, parent.capabilities, CapabilityDefinition::merge_over),
            interfaces: merge_map(&self.interfaces, parent.interfaces, InterfaceDefinition::merge_over),
            artifacts: merge_map(&self.artifacts, parent.artifacts, replace),
        }
    }
}

impl Inheritable for RelationshipType {
    const KIND: TypeKind = TypeKind::Relationship;

    fn parent(&self) -> Option<&str> {
        self.derived_from.as_deref()
    }

    fn clear_parent(&mut self) {
        self.derived_from = None;
    }

    fn merge_over(&self, parent: Self) -> Self {
        Self {
            derived_from: self.derived_from.clone(),
            version: pick_str(&self.version, parent.version),
            description: pick_str(&self.description, parent.description),
            properties: merge_map(&self.properties, parent.properties, PropertyDefinition::merge_over),
            attributes: merge_map(&self.attributes, parent.attributes, PropertyDefinition::merge_over),
            interfaces: merge_map(&self.interfaces, parent.interfaces, InterfaceDefinition::merge_over),
            valid_target_types: union_child_first(&self.valid_target_types, parent.valid_target_types),
        }
    }
}

impl Inheritable for CapabilityType {
    const KIND: TypeKind = TypeKind::Capability;

    fn parent(&self) -> Option<&str> {
        self.derived_from.as_deref()
    }

    fn clear_parent(&mut self) {
        self.derived_from = None;
    }

    fn merge_over(&self, parent: Self) -> Self {
        Self {
            derived_from: self.derived_from.clone(),
            version: pick_str(&self.version, parent.version),
            description: pick_str(&self.description, parent.description),
            properties: merge_map(&self.properties, parent.properties, PropertyDefinition::merge_over),
            attributes: merge_map(&self.attributes, parent.attributes, PropertyDefinition::merge_over),
            valid_source_types: union_child_first(&self.valid_source_types, parent.valid_source_types),
        }
    }
}

impl Inheritable for InterfaceType {
    const KIND: TypeKind = TypeKind::Interface;

    fn parent(&self) -> Option<&str> {
        self.derived_from.as_deref()
    }

    fn clear_parent(&mut self) {
        self.derived_from = None;
    }

    fn merge_over(&self, parent: Self) -> Self {
        Self {
            derived_from: self.derived_from.clone(),
            version: pick_str(&self.version, parent.version),
            description: pick_str(&self.description, parent.description),
            inputs: merge_map(&self.inputs, parent.inputs, replace),
            operations: merge_map(&self.operations, parent.operations, OperationDefinition::merge_over),
        }
    }
}

impl Inheritable for GroupType {
    const KIND: TypeKind = TypeKind::Group;

    fn parent(&self) -> Option<&str> {
        self.derived_from.as_deref()
    }

    fn clear_parent(&mut self) {
        self.derived_from = None;
    }

    fn merge_over(&self, parent: Self) -> Self {
        Self {
            derived_from: self.derived_from.clone(),
            version: pick_str(&self.version, parent.version),
            description: pick_str(&self.description, parent.description),
            properties: merge_map(&self.properties, parent.properties, PropertyDefinition::merge_over),
            attributes: merge_map(&self.attributes, parent.attributes, PropertyDefinition::merge_over),
            members: union_child_first(&self.members, parent.members),
            interfaces: merge_map(&self.interfaces, parent.interfaces, InterfaceDefinition::merge_over),
        }
    }
}

impl Inheritable for PolicyType {
    const KIND: TypeKind = TypeKind::Policy;

    fn parent(&self) -> Option<&str> {
        self.derived_from.as_deref()
    }

    fn clear_parent(&mut self) {
        self.derived_from = None;
    }

    fn merge_over(&self, parent: Self) -> Self {
        Self {
            derived_from: self.derived_from.clone(),
            version: pick_str(&self.version, parent.version),
            description: pick_str(&self.description, parent.description),
            properties: merge_map(&self.properties, parent.properties, PropertyDefinition::merge_over),
            targets: union_child_first(&self.targets, parent.targets),
        }
    }
}

// ============================================================================
// Chain resolution
// ============================================================================

/// Flatten one named type. The result has no parent reference left.
pub fn flatten_type<T: Inheritable>(name: &str, catalog: &IndexMap<String, T>) -> Result<T> {
    flatten_chain(name, catalog, &mut Vec::new()).map(|(merged, _)| merged)
}

/// Returns the merged type and its ancestors, nearest first.
fn flatten_chain<T: Inheritable>(
    name: &str,
    catalog: &IndexMap<String, T>,
    resolving: &mut Vec<String>,
) -> Result<(T, Vec<String>)> {
    if resolving.iter().any(|n| n == name) {
        let mut chain = resolving.clone();
        chain.push(name.to_string());
        return Err(TopologyError::CyclicType {
            kind: T::KIND,
            chain,
        });
    }

    let ty = catalog.get(name).ok_or_else(|| TopologyError::UnknownType {
        kind: T::KIND,
        name: name.to_string(),
        referenced_by: resolving.last().cloned().unwrap_or_else(|| name.to_string()),
    })?;

    let Some(parent_name) = ty.parent() else {
        return Ok((ty.clone(), Vec::new()));
    };

    resolving.push(name.to_string());
    let (parent, mut lineage) = flatten_chain(parent_name, catalog, resolving)?;
    resolving.pop();

    let mut merged = ty.merge_over(parent);
    merged.clear_parent();
    lineage.insert(0, parent_name.to_string());
    Ok((merged, lineage))
}

/// Flattened types of one kind plus each type's ancestor chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatCatalog<T> {
    pub types: IndexMap<String, T>,
    pub lineage: IndexMap<String, Vec<String>>,
}

impl<T> Default for FlatCatalog<T> {
    fn default() -> Self {
        Self {
            types: IndexMap::new(),
            lineage: IndexMap::new(),
        }
    }
}

impl<T> FlatCatalog<T> {
    pub fn get(&self, name: &str) -> Option<&T> {
        self.types.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// True when `name` is `ancestor` or inherits from it.
    pub fn is_derived_from(&self, name: &str, ancestor: &str) -> bool {
        name == ancestor
            || self
                .lineage
                .get(name)
                .is_some_and(|chain| chain.iter().any(|a| a == ancestor))
    }
}

/// Flatten every type of a catalog. Aborts on the first error.
pub fn flatten_catalog<T: Inheritable>(catalog: &IndexMap<String, T>) -> Result<FlatCatalog<T>> {
    let mut flat = FlatCatalog::default();
    for name in catalog.keys() {
        let (merged, lineage) = flatten_chain(name, catalog, &mut Vec::new())?;
        let kind = T::KIND;
        tracing::debug!(%kind, name = %name, depth = lineage.len(), "flattened type");
        flat.types.insert(name.clone(), merged);
        flat.lineage.insert(name.clone(), lineage);
    }
    Ok(flat)
}

// ============================================================================
// Whole model
// ============================================================================

/// Flattened catalogs plus the topology reconciled against them.
#[derive(Debug, Clone, Serialize)]
pub struct FlattenedModel {
    pub node_types: FlatCatalog<NodeType>,
    pub relationship_types: FlatCatalog<RelationshipType>,
    pub capability_types: FlatCatalog<CapabilityType>,
    pub interface_types: FlatCatalog<InterfaceType>,
    pub group_types: FlatCatalog<GroupType>,
    pub policy_types: FlatCatalog<PolicyType>,
    pub topology: TopologyTemplate,
    #[serde(skip)]
    runtime: AttributeStore,
}

impl FlattenedModel {
    pub fn node_template(&self, name: &str) -> Option<&NodeTemplate> {
        self.topology.node_templates.get(name)
    }

    pub fn relationship_template(&self, name: &str) -> Option<&RelationshipTemplate> {
        self.topology.relationship_templates.get(name)
    }

    /// Flattened type of a node template.
    pub fn node_type_of(&self, template: &str) -> Option<&NodeType> {
        self.node_template(template)
            .and_then(|t| self.node_types.get(&t.type_name))
    }

    /// Relationship type realizing a requirement: a named template's type or the bare type name.
    pub fn relationship_type_of<'a>(&'a self, assignment: &'a RelationshipAssignment) -> Option<&'a str> {
        let name = assignment.type_name.as_deref()?;
        match self.relationship_template(name) {
            Some(template) => Some(template.type_name.as_str()),
            None => Some(name),
        }
    }

    /// Runtime attribute setter. Shadows the template's assignment.
    pub fn set_attribute(&self, kind: ComponentKind, component: &str, name: &str, value: Value) -> Option<Value> {
        tracing::debug!(%kind, component, attribute = name, "attribute set");
        self.runtime.set(kind, component, name, value)
    }

    pub fn runtime(&self) -> &AttributeStore {
        &self.runtime
    }
}

/// Flatten all catalogs, cross-link capabilities and interfaces, and reconcile
/// the topology's templates against their flattened types.
pub fn flatten_model(template: &ServiceTemplate, policy: &PlanPolicy) -> Result<FlattenedModel> {
    let capability_types = flatten_catalog(&template.capability_types)?;
    let interface_types = flatten_catalog(&template.interface_types)?;
    let mut node_types = flatten_catalog(&template.node_types)?;
    let mut relationship_types = flatten_catalog(&template.relationship_types)?;
    let mut group_types = flatten_catalog(&template.group_types)?;
    let policy_types = flatten_catalog(&template.policy_types)?;

    cross_link_node_types(&mut node_types, &capability_types, &interface_types);
    for (name, rt) in relationship_types.types.iter_mut() {
        link_interfaces(name, &mut rt.interfaces, &interface_types);
    }
    for (name, gt) in group_types.types.iter_mut() {
        link_interfaces(name, &mut gt.interfaces, &interface_types);
    }

    let mut model = FlattenedModel {
        node_types,
        relationship_types,
        capability_types,
        interface_types,
        group_types,
        policy_types,
        topology: template.topology_template.clone(),
        runtime: AttributeStore::new(),
    };
    reconcile_topology(&mut model, policy)?;

    tracing::debug!(
        node_types = model.node_types.len(),
        relationship_types = model.relationship_types.len(),
        node_templates = model.topology.node_templates.len(),
        "model flattened"
    );
    Ok(model)
}

fn cross_link_node_types(
    node_types: &mut FlatCatalog<NodeType>,
    capability_types: &FlatCatalog<CapabilityType>,
    interface_types: &FlatCatalog<InterfaceType>,
) {
    for (name, node_type) in node_types.types.iter_mut() {
        link_interfaces(name, &mut node_type.interfaces, interface_types);

        for (cname, cdef) in node_type.capabilities.iter_mut() {
            let Some(type_name) = cdef.type_name.clone() else {
                continue;
            };
            match capability_types.get(&type_name) {
                Some(ct) => *cdef = cdef.link_type(ct),
                None => tracing::warn!(
                    node_type = %name,
                    capability = %cname,
                    capability_type = %type_name,
                    "capability type not in catalog; left unlinked"
                ),
            }
        }
    }
}

fn link_interfaces(
    owner: &str,
    interfaces: &mut IndexMap<String, InterfaceDefinition>,
    interface_types: &FlatCatalog<InterfaceType>,
) {
    for (iname, idef) in interfaces.iter_mut() {
        let Some(type_name) = idef.type_name.clone() else {
            continue;
        };
        match interface_types.get(&type_name) {
            Some(it) => *idef = idef.merge_over(InterfaceDefinition::from(it)),
            None => tracing::warn!(
                owner,
                interface = %iname,
                interface_type = %type_name,
                "interface type not in catalog; left unlinked"
            ),
        }
    }
}

fn fill_defaults(
    assignments: &mut IndexMap<String, Assignment>,
    definitions: &IndexMap<String, PropertyDefinition>,
) {
    for (name, def) in definitions {
        if assignments.contains_key(name) {
            continue;
        }
        if let Some(default) = &def.default {
            assignments.insert(name.clone(), Assignment::from_value(default.clone()));
        }
    }
}

fn reconcile_topology(model: &mut FlattenedModel, policy: &PlanPolicy) -> Result<()> {
    let mut templates = std::mem::take(&mut model.topology.node_templates);

    for (name, template) in templates.iter_mut() {
        let node_type = model
            .node_types
            .get(&template.type_name)
            .ok_or_else(|| TopologyError::UnknownType {
                kind: TypeKind::Node,
                name: template.type_name.clone(),
                referenced_by: name.clone(),
            })?;

        fill_defaults(&mut template.properties, &node_type.properties);
        fill_defaults(&mut template.attributes, &node_type.attributes);

        for (cname, cdef) in &node_type.capabilities {
            let assignment = template.capabilities.entry(cname.clone()).or_default();
            fill_defaults(&mut assignment.properties, &cdef.properties);
            fill_defaults(&mut assignment.attributes, &cdef.attributes);
        }

        template.interfaces = merge_map(
            &template.interfaces,
            node_type.interfaces.clone(),
            InterfaceDefinition::merge_over,
        );
        link_interfaces(name, &mut template.interfaces, &model.interface_types);

        for entry in template.requirements.iter_mut() {
            for (rname, req) in entry.iter_mut() {
                let Some(def) = node_type.requirement(rname) else {
                    continue;
                };
                if req.capability.is_none() {
                    req.capability = def.capability.clone();
                }
                if req.relationship.is_none() {
                    req.relationship = def.relationship.clone().map(|type_name| RelationshipAssignment {
                        type_name: Some(type_name),
                        ..RelationshipAssignment::default()
                    });
                }
            }
        }
    }

    if policy.infer_requirement_targets {
        infer_requirement_targets(&mut templates, &model.node_types);
    }
    model.topology.node_templates = templates;

    for (name, template) in model.topology.relationship_templates.iter_mut() {
        let rel_type = model
            .relationship_types
            .get(&template.type_name)
            .ok_or_else(|| TopologyError::UnknownType {
                kind: TypeKind::Relationship,
                name: template.type_name.clone(),
                referenced_by: name.clone(),
            })?;
        fill_defaults(&mut template.properties, &rel_type.properties);
        fill_defaults(&mut template.attributes, &rel_type.attributes);
        template.interfaces = merge_map(
            &template.interfaces,
            rel_type.interfaces.clone(),
            InterfaceDefinition::merge_over,
        );
        link_interfaces(name, &mut template.interfaces, &model.interface_types);
    }
    Ok(())
}

/// Bind target-less requirements whose definition names a node type (or a
/// template) to the single matching node template.
fn infer_requirement_targets(
    templates: &mut IndexMap<String, NodeTemplate>,
    node_types: &FlatCatalog<NodeType>,
) {
    let index: Vec<(String, String)> = templates
        .iter()
        .map(|(n, t)| (n.clone(), t.type_name.clone()))
        .collect();

    for (name, template) in templates.iter_mut() {
        let Some(node_type) = node_types.get(&template.type_name) else {
            continue;
        };
        for entry in template.requirements.iter_mut() {
            for (rname, req) in entry.iter_mut() {
                if req.node.is_some() {
                    continue;
                }
                let Some(wanted) = node_type.requirement(rname).and_then(|d| d.node.as_deref()) else {
                    continue;
                };
                let candidates: Vec<&str> = index
                    .iter()
                    .filter(|(cand, ty)| {
                        cand != name && (cand == wanted || node_types.is_derived_from(ty, wanted))
                    })
                    .map(|(cand, _)| cand.as_str())
                    .collect();
                match candidates.as_slice() {
                    [only] => {
                        tracing::debug!(node = %name, requirement = %rname, bound_to = %only, "requirement target inferred");
                        req.node = Some((*only).to_string());
                    }
                    [] => {}
                    many => tracing::debug!(
                        node = %name,
                        requirement = %rname,
                        candidates = many.len(),
                        "requirement target ambiguous; left unbound"
                    ),
                }
            }
        }
    }
}
