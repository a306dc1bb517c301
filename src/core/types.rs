//! TP-001: Topology model types.
//!
//! Type catalogs, component templates, planning policy, and the playbook
//! handed to an external executor. All template types derive
//! Serialize/Deserialize for YAML roundtripping.

use super::assignment::{Assignment, ConstraintClause, Value};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Top-level service template
// ============================================================================

/// Root document: type catalogs plus one topology.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceTemplate {
    /// Definitions version string, e.g. `tosca_simple_yaml_1_0`
    #[serde(default)]
    pub tosca_definitions_version: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub metadata: IndexMap<String, Value>,

    /// Import locations. Fetching them is the caller's concern.
    #[serde(default)]
    pub imports: Vec<Value>,

    #[serde(default)]
    pub node_types: IndexMap<String, NodeType>,

    #[serde(default)]
    pub relationship_types: IndexMap<String, RelationshipType>,

    #[serde(default)]
    pub capability_types: IndexMap<String, CapabilityType>,

    #[serde(default)]
    pub interface_types: IndexMap<String, InterfaceType>,

    #[serde(default)]
    pub group_types: IndexMap<String, GroupType>,

    #[serde(default)]
    pub policy_types: IndexMap<String, PolicyType>,

    #[serde(default)]
    pub topology_template: TopologyTemplate,
}

impl ServiceTemplate {
    /// Supply input values for this planning cycle. Unknown names are ignored.
    pub fn with_inputs(mut self, values: IndexMap<String, Value>) -> Self {
        for (name, value) in values {
            if let Some(param) = self.topology_template.inputs.get_mut(&name) {
                param.value = Some(Assignment::from_value(value));
            }
        }
        self
    }
}

/// Template instances plus inputs, outputs, and workflows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopologyTemplate {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub inputs: IndexMap<String, ParameterDefinition>,

    #[serde(default)]
    pub node_templates: IndexMap<String, NodeTemplate>,

    #[serde(default)]
    pub relationship_templates: IndexMap<String, RelationshipTemplate>,

    #[serde(default)]
    pub groups: IndexMap<String, GroupDefinition>,

    /// Sequenced single-key maps
    #[serde(default)]
    pub policies: Vec<IndexMap<String, PolicyDefinition>>,

    #[serde(default)]
    pub outputs: IndexMap<String, ParameterDefinition>,

    #[serde(default)]
    pub workflows: IndexMap<String, WorkflowDefinition>,
}

impl TopologyTemplate {
    pub fn policy_definitions(&self) -> impl Iterator<Item = (&str, &PolicyDefinition)> {
        self.policies
            .iter()
            .flat_map(|entry| entry.iter().map(|(k, v)| (k.as_str(), v)))
    }
}

/// Template-level input or output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    #[serde(rename = "type", default)]
    pub type_name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub required: Option<bool>,

    #[serde(default)]
    pub default: Option<Value>,

    /// Supplied value (inputs) or value expression (outputs)
    #[serde(default)]
    pub value: Option<Assignment>,

    #[serde(default)]
    pub constraints: Vec<ConstraintClause>,
}

impl ParameterDefinition {
    /// The value if supplied, otherwise the default.
    pub fn effective(&self) -> Option<Assignment> {
        self.value
            .clone()
            .or_else(|| self.default.clone().map(Assignment::from_value))
    }
}

// ============================================================================
// Shared definitions
// ============================================================================

/// Property or attribute schema entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyDefinition {
    #[serde(rename = "type", default)]
    pub type_name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub required: Option<bool>,

    #[serde(default)]
    pub default: Option<Value>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub constraints: Vec<ConstraintClause>,

    #[serde(default)]
    pub entry_schema: Option<Value>,
}

/// Attributes share the property definition grammar.
pub type AttributeDefinition = PropertyDefinition;

/// Capability declared on a node type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "CapabilityRepr")]
pub struct CapabilityDefinition {
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub description: Option<String>,
    pub properties: IndexMap<String, PropertyDefinition>,
    pub attributes: IndexMap<String, AttributeDefinition>,
    pub valid_source_types: Vec<String>,
    pub occurrences: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CapabilityRepr {
    Short(String),
    Full {
        #[serde(rename = "type", default)]
        type_name: Option<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        properties: IndexMap<String, PropertyDefinition>,
        #[serde(default)]
        attributes: IndexMap<String, AttributeDefinition>,
        #[serde(default)]
        valid_source_types: Vec<String>,
        #[serde(default)]
        occurrences: Vec<Value>,
    },
}

impl From<CapabilityRepr> for CapabilityDefinition {
    fn from(repr: CapabilityRepr) -> Self {
        match repr {
            CapabilityRepr::Short(type_name) => Self {
                type_name: Some(type_name),
                ..Self::default()
            },
            CapabilityRepr::Full {
                type_name,
                description,
                properties,
                attributes,
                valid_source_types,
                occurrences,
            } => Self {
                type_name,
                description,
                properties,
                attributes,
                valid_source_types,
                occurrences,
            },
        }
    }
}

/// Requirement declared on a node type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RequirementRepr")]
pub struct RequirementDefinition {
    pub capability: Option<String>,
    /// Node type the target must be (or derive from)
    pub node: Option<String>,
    pub relationship: Option<String>,
    pub occurrences: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RequirementRepr {
    Short(String),
    Full {
        #[serde(default)]
        capability: Option<String>,
        #[serde(default)]
        node: Option<String>,
        #[serde(default)]
        relationship: Option<RelationshipRef>,
        #[serde(default)]
        occurrences: Vec<Value>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RelationshipRef {
    Name(String),
    Typed {
        #[serde(rename = "type")]
        type_name: String,
    },
}

impl From<RequirementRepr> for RequirementDefinition {
    fn from(repr: RequirementRepr) -> Self {
        match repr {
            RequirementRepr::Short(capability) => Self {
                capability: Some(capability),
                ..Self::default()
            },
            RequirementRepr::Full {
                capability,
                node,
                relationship,
                occurrences,
            } => Self {
                capability,
                node,
                relationship: relationship.map(|r| match r {
                    RelationshipRef::Name(n) => n,
                    RelationshipRef::Typed { type_name } => type_name,
                }),
                occurrences,
            },
        }
    }
}

/// Operation implementation artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ImplementationRepr")]
pub struct Implementation {
    pub primary: String,
    pub dependencies: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ImplementationRepr {
    Short(String),
    Full {
        primary: String,
        #[serde(default)]
        dependencies: Vec<String>,
    },
}

impl From<ImplementationRepr> for Implementation {
    fn from(repr: ImplementationRepr) -> Self {
        match repr {
            ImplementationRepr::Short(primary) => Self {
                primary,
                dependencies: Vec::new(),
            },
            ImplementationRepr::Full {
                primary,
                dependencies,
            } => Self {
                primary,
                dependencies,
            },
        }
    }
}

/// One named operation of an interface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "OperationRepr")]
pub struct OperationDefinition {
    pub description: Option<String>,
    pub implementation: Option<Implementation>,
    pub inputs: IndexMap<String, Assignment>,
}

impl OperationDefinition {
    /// An operation implements its stage only when it names an artifact.
    pub fn is_implemented(&self) -> bool {
        self.implementation
            .as_ref()
            .is_some_and(|i| !i.primary.is_empty())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OperationRepr {
    Empty(()),
    Short(String),
    Full {
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        implementation: Option<Implementation>,
        #[serde(default)]
        inputs: IndexMap<String, Assignment>,
    },
}

impl From<OperationRepr> for OperationDefinition {
    fn from(repr: OperationRepr) -> Self {
        match repr {
            OperationRepr::Empty(()) => Self::default(),
            OperationRepr::Short(primary) => Self {
                implementation: Some(Implementation {
                    primary,
                    dependencies: Vec::new(),
                }),
                ..Self::default()
            },
            OperationRepr::Full {
                description,
                implementation,
                inputs,
            } => Self {
                description,
                implementation,
                inputs,
            },
        }
    }
}

/// Interface on a type or a template. Operations sit inline next to `type`/`inputs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceDefinition {
    #[serde(rename = "type", default)]
    pub type_name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub inputs: IndexMap<String, Assignment>,

    #[serde(flatten)]
    pub operations: IndexMap<String, OperationDefinition>,
}

// ============================================================================
// Type catalogs
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeType {
    #[serde(default)]
    pub derived_from: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub properties: IndexMap<String, PropertyDefinition>,

    #[serde(default)]
    pub attributes: IndexMap<String, AttributeDefinition>,

    /// Sequenced single-key maps
    #[serde(default)]
    pub requirements: Vec<IndexMap<String, RequirementDefinition>>,

    #[serde(default)]
    pub capabilities: IndexMap<String, CapabilityDefinition>,

    #[serde(default)]
    pub interfaces: IndexMap<String, InterfaceDefinition>,

    #[serde(default)]
    pub artifacts: IndexMap<String, Value>,
}

impl NodeType {
    /// First requirement definition with this name.
    pub fn requirement(&self, name: &str) -> Option<&RequirementDefinition> {
        self.requirements.iter().find_map(|entry| entry.get(name))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipType {
    #[serde(default)]
    pub derived_from: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub properties: IndexMap<String, PropertyDefinition>,

    #[serde(default)]
    pub attributes: IndexMap<String, AttributeDefinition>,

    #[serde(default)]
    pub interfaces: IndexMap<String, InterfaceDefinition>,

    #[serde(default)]
    pub valid_target_types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityType {
    #[serde(default)]
    pub derived_from: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub properties: IndexMap<String, PropertyDefinition>,

    #[serde(default)]
    pub attributes: IndexMap<String, AttributeDefinition>,

    #[serde(default)]
    pub valid_source_types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceType {
    #[serde(default)]
    pub derived_from: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub inputs: IndexMap<String, Assignment>,

    #[serde(flatten)]
    pub operations: IndexMap<String, OperationDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupType {
    #[serde(default)]
    pub derived_from: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub properties: IndexMap<String, PropertyDefinition>,

    #[serde(default)]
    pub attributes: IndexMap<String, AttributeDefinition>,

    /// Node types allowed as members
    #[serde(default)]
    pub members: Vec<String>,

    #[serde(default)]
    pub interfaces: IndexMap<String, InterfaceDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyType {
    #[serde(default)]
    pub derived_from: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub properties: IndexMap<String, PropertyDefinition>,

    /// Node or group types the policy may target
    #[serde(default)]
    pub targets: Vec<String>,
}

// ============================================================================
// Templates
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeTemplate {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub directives: Vec<String>,

    #[serde(default)]
    pub properties: IndexMap<String, Assignment>,

    #[serde(default)]
    pub attributes: IndexMap<String, Assignment>,

    /// Sequenced single-key maps; one name may repeat
    #[serde(default)]
    pub requirements: Vec<IndexMap<String, RequirementAssignment>>,

    #[serde(default)]
    pub capabilities: IndexMap<String, CapabilityAssignment>,

    #[serde(default)]
    pub interfaces: IndexMap<String, InterfaceDefinition>,

    #[serde(default)]
    pub artifacts: IndexMap<String, Value>,
}

impl NodeTemplate {
    /// Requirement assignments in declaration order.
    pub fn requirement_assignments(&self) -> impl Iterator<Item = (&str, &RequirementAssignment)> {
        self.requirements
            .iter()
            .flat_map(|entry| entry.iter().map(|(k, v)| (k.as_str(), v)))
    }

    pub fn requirement(&self, name: &str) -> Option<&RequirementAssignment> {
        self.requirement_assignments()
            .find(|(n, _)| *n == name)
            .map(|(_, r)| r)
    }
}

/// Binding of one requirement to a target node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RequirementAssignmentRepr")]
pub struct RequirementAssignment {
    pub capability: Option<String>,
    /// Target node template, possibly unresolved
    pub node: Option<String>,
    pub relationship: Option<RelationshipAssignment>,
    pub node_filter: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RequirementAssignmentRepr {
    Short(String),
    Full {
        #[serde(default)]
        capability: Option<String>,
        #[serde(default)]
        node: Option<String>,
        #[serde(default)]
        relationship: Option<RelationshipAssignment>,
        #[serde(default)]
        node_filter: Option<Value>,
    },
}

impl From<RequirementAssignmentRepr> for RequirementAssignment {
    fn from(repr: RequirementAssignmentRepr) -> Self {
        match repr {
            RequirementAssignmentRepr::Short(node) => Self {
                node: Some(node),
                ..Self::default()
            },
            RequirementAssignmentRepr::Full {
                capability,
                node,
                relationship,
                node_filter,
            } => Self {
                capability,
                node,
                relationship,
                node_filter,
            },
        }
    }
}

/// Relationship scoped to one requirement. The bare-string form names either
/// a relationship template or a relationship type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "RelationshipAssignmentRepr")]
pub struct RelationshipAssignment {
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    pub properties: IndexMap<String, Assignment>,
    pub interfaces: IndexMap<String, InterfaceDefinition>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RelationshipAssignmentRepr {
    Short(String),
    Full {
        #[serde(rename = "type", default)]
        type_name: Option<String>,
        #[serde(default)]
        properties: IndexMap<String, Assignment>,
        #[serde(default)]
        interfaces: IndexMap<String, InterfaceDefinition>,
    },
}

impl From<RelationshipAssignmentRepr> for RelationshipAssignment {
    fn from(repr: RelationshipAssignmentRepr) -> Self {
        match repr {
            RelationshipAssignmentRepr::Short(name) => Self {
                type_name: Some(name),
                ..Self::default()
            },
            RelationshipAssignmentRepr::Full {
                type_name,
                properties,
                interfaces,
            } => Self {
                type_name,
                properties,
                interfaces,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityAssignment {
    #[serde(default)]
    pub properties: IndexMap<String, Assignment>,

    #[serde(default)]
    pub attributes: IndexMap<String, Assignment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelationshipTemplate {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub properties: IndexMap<String, Assignment>,

    #[serde(default)]
    pub attributes: IndexMap<String, Assignment>,

    #[serde(default)]
    pub interfaces: IndexMap<String, InterfaceDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupDefinition {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub properties: IndexMap<String, Assignment>,

    /// Member node template names
    #[serde(default)]
    pub members: Vec<String>,

    #[serde(default)]
    pub interfaces: IndexMap<String, InterfaceDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDefinition {
    #[serde(rename = "type")]
    pub type_name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub properties: IndexMap<String, Assignment>,

    /// Node template or group names
    #[serde(default)]
    pub targets: Vec<String>,
}

// ============================================================================
// Workflows (carried through to the playbook, not interpreted)
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub inputs: IndexMap<String, ParameterDefinition>,

    #[serde(default)]
    pub steps: IndexMap<String, WorkflowStep>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub target: String,

    #[serde(default)]
    pub target_relationship: Option<String>,

    #[serde(default)]
    pub operation_host: Option<String>,

    #[serde(default)]
    pub activities: Vec<Value>,

    #[serde(default)]
    pub on_success: OneOrMany,

    #[serde(default)]
    pub on_failure: OneOrMany,
}

/// Single step name or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    Single(String),
    Multiple(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        Self::Multiple(Vec::new())
    }
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::Single(s) => vec![s.clone()],
            Self::Multiple(v) => v.clone(),
        }
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Planning policy, loaded separately from the template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPolicy {
    /// Tie-break when several implemented operations map to one stage
    #[serde(default)]
    pub duplicate_stage: DuplicateStagePolicy,

    /// Fail the plan when a required input has no value
    #[serde(default)]
    pub strict_inputs: bool,

    /// Bind target-less requirements to the unique node of the required type
    #[serde(default = "default_true")]
    pub infer_requirement_targets: bool,

    /// Nested evaluation limit before giving up with "undefined"
    #[serde(default = "default_max_eval_depth")]
    pub max_eval_depth: usize,
}

impl Default for PlanPolicy {
    fn default() -> Self {
        Self {
            duplicate_stage: DuplicateStagePolicy::default(),
            strict_inputs: false,
            infer_requirement_targets: true,
            max_eval_depth: default_max_eval_depth(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_eval_depth() -> usize {
    32
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateStagePolicy {
    #[default]
    FirstWins,
    LastWins,
    Strict,
}

// ============================================================================
// Plan
// ============================================================================

/// Canonical lifecycle stages, in bring-up/teardown order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Create,
    Configure,
    Start,
    Stop,
    Delete,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Self::Create,
        Self::Configure,
        Self::Start,
        Self::Stop,
        Self::Delete,
    ];

    pub fn parse(operation: &str) -> Option<Self> {
        match operation {
            "create" => Some(Self::Create),
            "configure" => Some(Self::Configure),
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Configure => write!(f, "configure"),
            Self::Start => write!(f, "start"),
            Self::Stop => write!(f, "stop"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayKind {
    Start,
    Stop,
    Operation,
}

/// One (component, operation) vertex of the lifecycle graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Play {
    pub id: usize,
    pub kind: PlayKind,
    /// Node template name; empty for sentinels
    pub component: String,
    pub interface: Option<String>,
    pub operation: String,
    pub stage: Option<Stage>,
    pub implementation: Option<Implementation>,
    /// Interface inputs overlaid with operation inputs, unevaluated
    pub inputs: IndexMap<String, Assignment>,
}

impl Play {
    pub fn label(&self) -> String {
        match self.kind {
            PlayKind::Start => "START".to_string(),
            PlayKind::Stop => "STOP".to_string(),
            PlayKind::Operation => format!("{}:{}", self.component, self.operation),
        }
    }
}

impl fmt::Display for Play {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Labeled requirement edge of the component graph: source depends on target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequirementEdge {
    pub source: String,
    pub target: String,
    pub requirement: String,
    pub capability: Option<String>,
    pub relationship: Option<String>,
}

/// One vertex per node template, one edge per resolved requirement.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComponentGraph {
    pub nodes: Vec<String>,
    pub edges: Vec<RequirementEdge>,
}

impl ComponentGraph {
    /// Direct dependencies of a node.
    pub fn targets_of<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.source == node)
            .map(|e| e.target.as_str())
    }
}

/// Ordered plays plus their dependency graph, ready for an external executor.
#[derive(Debug, Clone, Serialize)]
pub struct Playbook {
    /// Indexed by play id
    pub plays: Vec<Play>,

    /// Sorted, deduplicated successor lists, indexed by play id
    pub adjacency: Vec<Vec<usize>>,

    pub start: usize,
    pub stop: usize,

    pub topology: ComponentGraph,

    /// Copied through unevaluated
    pub inputs: IndexMap<String, ParameterDefinition>,
    pub outputs: IndexMap<String, ParameterDefinition>,
    pub workflows: IndexMap<String, WorkflowDefinition>,
}

// ============================================================================
// Template helper
// ============================================================================

/// String form of a value for concatenation. Null is the empty string.
pub fn value_to_string(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Tagged(tagged) => value_to_string(&tagged.value),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tp001_template_parse() {
        let yaml = r#"
tosca_definitions_version: tosca_simple_yaml_1_0
description: two tier
node_types:
  web.Server:
    derived_from: tosca.nodes.Root
    properties:
      port:
        type: integer
        default: 80
    capabilities:
      host: tosca.capabilities.Container
    requirements:
      - host:
          capability: tosca.capabilities.Container
          relationship: tosca.relationships.HostedOn
    interfaces:
      Standard:
        type: tosca.interfaces.node.lifecycle.Standard
        create: scripts/create.sh
        start:
          implementation: scripts/start.sh
          inputs:
            port: { get_property: [SELF, port] }
topology_template:
  inputs:
    port:
      type: integer
      default: 8080
  node_templates:
    vm:
      type: tosca.nodes.Compute
    web:
      type: web.Server
      requirements:
        - host: vm
"#;
        let t: ServiceTemplate = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(t.tosca_definitions_version, "tosca_simple_yaml_1_0");
        let web = &t.node_types["web.Server"];
        assert_eq!(web.derived_from.as_deref(), Some("tosca.nodes.Root"));
        assert_eq!(
            web.capabilities["host"].type_name.as_deref(),
            Some("tosca.capabilities.Container")
        );
        let std_iface = &web.interfaces["Standard"];
        assert_eq!(std_iface.operations.len(), 2);
        assert_eq!(
            std_iface.operations["create"].implementation.as_ref().unwrap().primary,
            "scripts/create.sh"
        );
        assert!(std_iface.operations["start"].inputs["port"].is_function());
        let req = t.topology_template.node_templates["web"].requirement("host").unwrap();
        assert_eq!(req.node.as_deref(), Some("vm"));
    }

    #[test]
    fn test_tp001_requirement_full_form() {
        let yaml = r#"
capability: tosca.capabilities.Endpoint
node: db
relationship:
  type: tosca.relationships.ConnectsTo
  properties:
    user: admin
"#;
        let r: RequirementAssignment = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(r.node.as_deref(), Some("db"));
        let rel = r.relationship.unwrap();
        assert_eq!(rel.type_name.as_deref(), Some("tosca.relationships.ConnectsTo"));
        assert_eq!(rel.properties["user"], Assignment::literal("admin"));
    }

    #[test]
    fn test_tp001_relationship_short_form() {
        let r: RequirementAssignment =
            serde_yaml_ng::from_str("{ node: db, relationship: my_connection }").unwrap();
        assert_eq!(
            r.relationship.unwrap().type_name.as_deref(),
            Some("my_connection")
        );
    }

    #[test]
    fn test_tp001_bare_operation_is_unimplemented() {
        let iface: InterfaceDefinition =
            serde_yaml_ng::from_str("create:\nstop:\n  description: halt\n").unwrap();
        assert!(!iface.operations["create"].is_implemented());
        assert!(!iface.operations["stop"].is_implemented());
    }

    #[test]
    fn test_tp001_implementation_full_form() {
        let op: OperationDefinition = serde_yaml_ng::from_str(
            "{ implementation: { primary: run.sh, dependencies: [lib.sh] } }",
        )
        .unwrap();
        assert!(op.is_implemented());
        assert_eq!(op.implementation.unwrap().dependencies, vec!["lib.sh"]);
    }

    #[test]
    fn test_tp001_with_inputs() {
        let yaml = r#"
topology_template:
  inputs:
    port:
      default: 80
"#;
        let t: ServiceTemplate = serde_yaml_ng::from_str(yaml).unwrap();
        let t = t.with_inputs(IndexMap::from([
            ("port".to_string(), Value::from(9000)),
            ("unknown".to_string(), Value::from(1)),
        ]));
        let port = &t.topology_template.inputs["port"];
        assert_eq!(port.effective(), Some(Assignment::literal(9000)));
        assert!(!t.topology_template.inputs.contains_key("unknown"));
    }

    #[test]
    fn test_tp001_parameter_effective_falls_back_to_default() {
        let p = ParameterDefinition {
            default: Some(Value::from("x")),
            ..ParameterDefinition::default()
        };
        assert_eq!(p.effective(), Some(Assignment::literal("x")));
        assert_eq!(ParameterDefinition::default().effective(), None);
    }

    #[test]
    fn test_tp001_policy_defaults() {
        let p = PlanPolicy::default();
        assert_eq!(p.duplicate_stage, DuplicateStagePolicy::FirstWins);
        assert!(!p.strict_inputs);
        assert!(p.infer_requirement_targets);
        assert_eq!(p.max_eval_depth, 32);

        let parsed: PlanPolicy = serde_yaml_ng::from_str("duplicate_stage: strict").unwrap();
        assert_eq!(parsed.duplicate_stage, DuplicateStagePolicy::Strict);
        assert!(parsed.infer_requirement_targets);
    }

    #[test]
    fn test_tp001_stage_parse_and_order() {
        assert_eq!(Stage::parse("configure"), Some(Stage::Configure));
        assert_eq!(Stage::parse("backup"), None);
        assert!(Stage::Create < Stage::Start);
        assert_eq!(Stage::Delete.to_string(), "delete");
    }

    #[test]
    fn test_tp001_workflow_step_on_success_forms() {
        let yaml = r#"
steps:
  a:
    target: web
    activities:
      - call_operation: Standard.create
    on_success: b
  b:
    target: web
    on_success: [c, d]
"#;
        let wf: WorkflowDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(wf.steps["a"].on_success.to_vec(), vec!["b"]);
        assert_eq!(wf.steps["b"].on_success.to_vec(), vec!["c", "d"]);
        assert!(wf.steps["b"].on_failure.to_vec().is_empty());
    }

    #[test]
    fn test_tp001_policies_are_sequenced() {
        let yaml = r#"
policies:
  - placement:
      type: my.Placement
      targets: [web]
  - scaling:
      type: my.Scaling
"#;
        let t: TopologyTemplate = serde_yaml_ng::from_str(yaml).unwrap();
        let names: Vec<_> = t.policy_definitions().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["placement", "scaling"]);
    }

    #[test]
    fn test_tp001_value_to_string() {
        assert_eq!(value_to_string(&Value::String("hello".into())), "hello");
        assert_eq!(value_to_string(&Value::from(42)), "42");
        assert_eq!(value_to_string(&Value::Bool(true)), "true");
        assert_eq!(value_to_string(&Value::Null), "");
    }
}
