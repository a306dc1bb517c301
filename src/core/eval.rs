//! TP-005: Intrinsic function evaluation.
//!
//! `Evaluator::evaluate` turns an assignment into a concrete value in the
//! context of one component. `None` is "undefined": any missing component,
//! property, attribute, or index degrades to it instead of failing. Values
//! found on another component are evaluated in that component's context.
//! A stored value that reaches itself while being evaluated is undefined.

use super::assignment::{Assignment, FunctionCall, FunctionName, Value};
use super::attributes::ComponentKind;
use super::error::{Result, TopologyError};
use super::flatten::FlattenedModel;
use super::types::{value_to_string, CapabilityAssignment, PlanPolicy, RequirementAssignment};
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::fmt;

/// Relationship type whose requirements `HOST` walks, besides requirements named `host`.
pub const HOSTED_ON: &str = "tosca.relationships.HostedOn";

const DEFAULT_MAX_DEPTH: usize = 32;

/// Who `SELF` is while evaluating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalContext {
    /// Template-level inputs and outputs; no `SELF`.
    Topology,
    Node(String),
    /// Endpoints left `None` are discovered from the requirement using the relationship.
    Relationship {
        name: String,
        source: Option<String>,
        target: Option<String>,
    },
}

impl EvalContext {
    pub fn node(name: impl Into<String>) -> Self {
        Self::Node(name.into())
    }

    pub fn relationship(name: impl Into<String>) -> Self {
        Self::Relationship {
            name: name.into(),
            source: None,
            target: None,
        }
    }
}

impl fmt::Display for EvalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Topology => write!(f, "topology"),
            Self::Node(name) => write!(f, "node '{name}'"),
            Self::Relationship { name, .. } => write!(f, "relationship '{name}'"),
        }
    }
}

/// How `Evaluator::input` returns an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// The stored assignment, functions left in place
    Raw,
    /// The evaluated value, wrapped as a literal
    Evaluated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Property,
    Attribute,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Component {
    kind: ComponentKind,
    name: String,
}

impl Component {
    fn context(&self) -> EvalContext {
        match self.kind {
            ComponentKind::Node => EvalContext::node(&self.name),
            ComponentKind::Relationship => EvalContext::relationship(&self.name),
        }
    }
}

/// Identity of a stored value, for spotting an evaluation that reaches itself.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldKey {
    Input(String),
    Field {
        kind: ComponentKind,
        component: String,
        field: Field,
        capability: Option<String>,
        name: String,
    },
}

impl FieldKey {
    fn field(comp: &Component, field: Field, capability: Option<&str>, name: &str) -> Self {
        Self::Field {
            kind: comp.kind,
            component: comp.name.clone(),
            field,
            capability: capability.map(String::from),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input(name) => write!(f, "input '{name}'"),
            Self::Field {
                kind,
                component,
                capability: Some(capability),
                name,
                ..
            } => write!(f, "{kind} '{component}' {capability}.{name}"),
            Self::Field {
                kind, component, name, ..
            } => write!(f, "{kind} '{component}' {name}"),
        }
    }
}

/// Nesting depth plus the stored values being evaluated on the current path.
#[derive(Debug, Clone, Copy, Default)]
struct Trail<'t> {
    depth: usize,
    open: Option<(&'t FieldKey, &'t Trail<'t>)>,
}

impl<'t> Trail<'t> {
    fn deeper(self) -> Self {
        Self {
            depth: self.depth + 1,
            ..self
        }
    }

    fn contains(&self, key: &FieldKey) -> bool {
        let mut open = self.open;
        while let Some((k, parent)) = open {
            if k == key {
                return true;
            }
            open = parent.open;
        }
        false
    }

    fn enter<'s>(&'s self, key: &'s FieldKey) -> Trail<'s> {
        Trail {
            depth: self.depth + 1,
            open: Some((key, self)),
        }
    }
}

/// A field's stored form: a runtime value or a template assignment.
enum Found<'m> {
    Runtime(Value),
    Assigned(&'m Assignment),
}

pub struct Evaluator<'m> {
    model: &'m FlattenedModel,
    max_depth: usize,
}

impl<'m> Evaluator<'m> {
    pub fn new(model: &'m FlattenedModel) -> Self {
        Self {
            model,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn for_policy(model: &'m FlattenedModel, policy: &PlanPolicy) -> Self {
        Self::new(model).with_max_depth(policy.max_eval_depth)
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Evaluate an assignment. `None` means undefined.
    pub fn evaluate(&self, assignment: &Assignment, ctx: &EvalContext) -> Option<Value> {
        self.eval(assignment, ctx, Trail::default())
    }

    /// Like `evaluate`, but undefined is an `UnresolvedReference` error.
    pub fn evaluate_strict(&self, assignment: &Assignment, ctx: &EvalContext) -> Result<Value> {
        self.evaluate(assignment, ctx)
            .ok_or_else(|| TopologyError::UnresolvedReference {
                reference: format!("{} in {ctx}", value_to_string(&assignment.to_value())),
            })
    }

    /// Template input by name, raw or evaluated.
    pub fn input(&self, name: &str, mode: InputMode) -> Option<Assignment> {
        let raw = self.model.topology.inputs.get(name)?.effective()?;
        match mode {
            InputMode::Raw => Some(raw),
            InputMode::Evaluated => self
                .eval(&raw, &EvalContext::Topology, Trail::default())
                .map(Assignment::Literal),
        }
    }

    /// Every template output, evaluated at topology scope.
    pub fn resolve_outputs(&self) -> IndexMap<String, Option<Value>> {
        self.model
            .topology
            .outputs
            .iter()
            .map(|(name, param)| {
                let value = param
                    .effective()
                    .and_then(|a| self.evaluate(&a, &EvalContext::Topology));
                if value.is_none() {
                    tracing::debug!(output = %name, "output undefined");
                }
                (name.clone(), value)
            })
            .collect()
    }

    /// Nodes reached by following hosting requirements from `node`, nearest first.
    pub fn host_chain(&self, node: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut visited = FxHashSet::default();
        visited.insert(node.to_string());
        let mut current = node.to_string();
        while let Some(host) = self.host_of(&current) {
            if !visited.insert(host.clone()) {
                tracing::warn!(node, host = %host, "hosting chain loops; stopping walk");
                break;
            }
            chain.push(host.clone());
            current = host;
        }
        chain
    }

    /// Source and target of the first requirement realized by a relationship template.
    pub fn relationship_endpoints(&self, relationship: &str) -> Option<(String, String)> {
        self.model
            .topology
            .node_templates
            .iter()
            .find_map(|(source, template)| {
                template.requirement_assignments().find_map(|(_, req)| {
                    let rel = req.relationship.as_ref()?.type_name.as_deref()?;
                    if rel != relationship {
                        return None;
                    }
                    Some((source.clone(), req.node.clone()?))
                })
            })
    }

    fn eval(&self, assignment: &Assignment, ctx: &EvalContext, trail: Trail<'_>) -> Option<Value> {
        if trail.depth > self.max_depth {
            tracing::warn!(
                context = %ctx,
                max_depth = self.max_depth,
                "evaluation depth exceeded; treating as undefined"
            );
            return None;
        }
        match assignment {
            Assignment::Literal(value) => Some(value.clone()),
            Assignment::Constraint(clause) => Some(clause.to_value()),
            Assignment::Function(call) => self.call(call, ctx, trail),
        }
    }

    fn call(&self, call: &FunctionCall, ctx: &EvalContext, trail: Trail<'_>) -> Option<Value> {
        match call.name {
            FunctionName::Concat => Some(self.concat(&call.args, ctx, trail)),
            FunctionName::GetInput => self.get_input(&call.args, ctx, trail),
            FunctionName::GetProperty => self.get_field(Field::Property, &call.args, ctx, trail),
            FunctionName::GetAttribute => self.get_field(Field::Attribute, &call.args, ctx, trail),
            other => {
                tracing::trace!(function = %other, "function not evaluated");
                None
            }
        }
    }

    fn concat(&self, args: &[Assignment], ctx: &EvalContext, trail: Trail<'_>) -> Value {
        let joined: String = args
            .iter()
            .filter_map(|arg| self.eval(arg, ctx, trail.deeper()))
            .map(|v| value_to_string(&v))
            .collect();
        Value::String(joined)
    }

    fn get_input(&self, args: &[Assignment], ctx: &EvalContext, trail: Trail<'_>) -> Option<Value> {
        let strings = self.arg_strings(args, ctx, trail)?;
        let (name, path) = strings.split_first()?;
        let Some(raw) = self.model.topology.inputs.get(name).and_then(|p| p.effective()) else {
            tracing::trace!(input = %name, "input undefined");
            return None;
        };
        let key = FieldKey::Input(name.clone());
        self.realize(Found::Assigned(&raw), &key, &EvalContext::Topology, path, trail)
    }

    fn get_field(&self, field: Field, args: &[Assignment], ctx: &EvalContext, trail: Trail<'_>) -> Option<Value> {
        let strings = self.arg_strings(args, ctx, trail)?;
        let (reference, rest) = strings.split_first()?;
        let candidates = self.resolve_ref(reference, ctx, field, rest);

        match rest {
            [] => None,
            [name] => candidates.iter().find_map(|comp| {
                let found = self.lookup(comp, field, name)?;
                let key = FieldKey::field(comp, field, None, name);
                self.realize(found, &key, &comp.context(), &[], trail)
            }),
            [scope, name, path @ ..] => candidates
                .iter()
                .find_map(|comp| self.lookup_scoped(comp, field, scope, name, path, trail)),
        }
    }

    /// `[ref, capability_or_requirement, name, path...]`, tried on the
    /// requirement's target, then the source's own capability, then as a
    /// plain field with the rest as a path.
    fn lookup_scoped(
        &self,
        comp: &Component,
        field: Field,
        scope: &str,
        name: &str,
        path: &[String],
        trail: Trail<'_>,
    ) -> Option<Value> {
        if comp.kind == ComponentKind::Node {
            if let Some(template) = self.model.node_template(&comp.name) {
                if let Some(req) = template.requirement(scope) {
                    if let Some(target) = req.node.as_deref() {
                        let found = self.target_capability(target, req, scope).and_then(|(cname, cap)| {
                            capability_field(cap, field).get(name).map(|found| (cname, found))
                        });
                        if let Some((cname, found)) = found {
                            tracing::trace!(node = %comp.name, requirement = scope, bound_to = target, "resolved through requirement");
                            let owner = Component {
                                kind: ComponentKind::Node,
                                name: target.to_string(),
                            };
                            let key = FieldKey::field(&owner, field, Some(cname), name);
                            return self.realize(Found::Assigned(found), &key, &owner.context(), path, trail);
                        }
                    }
                }
                let own = template
                    .capabilities
                    .get(scope)
                    .and_then(|cap| capability_field(cap, field).get(name));
                if let Some(found) = own {
                    let key = FieldKey::field(comp, field, Some(scope), name);
                    return self.realize(Found::Assigned(found), &key, &comp.context(), path, trail);
                }
            }
        }

        let found = self.lookup(comp, field, scope)?;
        let mut full_path = Vec::with_capacity(path.len() + 1);
        full_path.push(name.to_string());
        full_path.extend_from_slice(path);
        let key = FieldKey::field(comp, field, None, scope);
        self.realize(found, &key, &comp.context(), &full_path, trail)
    }

    /// Capability on `target` that a requirement binds to: by the requirement's
    /// name, by capability name, then by capability type.
    fn target_capability(
        &self,
        target: &str,
        requirement: &RequirementAssignment,
        scope: &str,
    ) -> Option<(&'m str, &'m CapabilityAssignment)> {
        let template = self.model.node_template(target)?;
        if let Some((cname, cap)) = template.capabilities.get_key_value(scope) {
            return Some((cname.as_str(), cap));
        }
        let wanted = requirement.capability.as_deref()?;
        if let Some((cname, cap)) = template.capabilities.get_key_value(wanted) {
            return Some((cname.as_str(), cap));
        }
        let node_type = self.model.node_types.get(&template.type_name)?;
        node_type
            .capabilities
            .iter()
            .find(|(_, def)| {
                def.type_name
                    .as_deref()
                    .is_some_and(|t| self.model.capability_types.is_derived_from(t, wanted))
            })
            .and_then(|(cname, _)| template.capabilities.get_key_value(cname))
            .map(|(cname, cap)| (cname.as_str(), cap))
    }

    /// Runtime attribute values shadow template assignments.
    fn lookup(&self, comp: &Component, field: Field, name: &str) -> Option<Found<'m>> {
        if field == Field::Attribute {
            if let Some(value) = self.model.runtime().get(comp.kind, &comp.name, name) {
                return Some(Found::Runtime(value));
            }
        }
        let fields = match (comp.kind, field) {
            (ComponentKind::Node, Field::Property) => &self.model.node_template(&comp.name)?.properties,
            (ComponentKind::Node, Field::Attribute) => &self.model.node_template(&comp.name)?.attributes,
            (ComponentKind::Relationship, Field::Property) => {
                &self.model.relationship_template(&comp.name)?.properties
            }
            (ComponentKind::Relationship, Field::Attribute) => {
                &self.model.relationship_template(&comp.name)?.attributes
            }
        };
        fields.get(name).map(Found::Assigned)
    }

    /// Evaluate a found field in its owner's context, then walk the index path.
    /// A field already being evaluated further up the path is undefined.
    fn realize(
        &self,
        found: Found<'_>,
        key: &FieldKey,
        owner: &EvalContext,
        path: &[String],
        trail: Trail<'_>,
    ) -> Option<Value> {
        if matches!(found, Found::Assigned(_)) && trail.contains(key) {
            tracing::warn!(field = %key, context = %owner, "field refers to itself; treating as undefined");
            return None;
        }
        let trail = trail.enter(key);
        let mut value = match found {
            Found::Runtime(value) => value,
            Found::Assigned(assignment) => self.eval(assignment, owner, trail)?,
        };
        for segment in path {
            let next = index_value(&value, segment)?;
            value = self.eval(&Assignment::from_value(next), owner, trail)?;
        }
        Some(value)
    }

    fn arg_strings(&self, args: &[Assignment], ctx: &EvalContext, trail: Trail<'_>) -> Option<Vec<String>> {
        args.iter()
            .map(|arg| self.eval(arg, ctx, trail.deeper()).map(|v| value_to_string(&v)))
            .collect()
    }

    /// Components a reference may denote, in the order they should be tried.
    fn resolve_ref(&self, reference: &str, ctx: &EvalContext, field: Field, rest: &[String]) -> Vec<Component> {
        let node = |name: &str| Component {
            kind: ComponentKind::Node,
            name: name.to_string(),
        };
        match (reference, ctx) {
            ("SELF", EvalContext::Node(name)) => vec![node(name.as_str())],
            ("SELF", EvalContext::Relationship { name, .. }) => vec![Component {
                kind: ComponentKind::Relationship,
                name: name.clone(),
            }],
            ("SOURCE" | "TARGET", EvalContext::Relationship { name, source, target }) => {
                let explicit = if reference == "SOURCE" { source } else { target };
                let endpoint = explicit.clone().or_else(|| {
                    self.relationship_endpoints(name)
                        .map(|(s, t)| if reference == "SOURCE" { s } else { t })
                });
                endpoint.map(|n| node(n.as_str())).into_iter().collect()
            }
            ("HOST", EvalContext::Node(name)) => {
                let hosts: Vec<Component> = self.host_chain(name).iter().map(|h| node(h.as_str())).collect();
                // First host offering the field; the full chain is tried for scoped lookups.
                match rest {
                    [field_name] => hosts
                        .into_iter()
                        .filter(|h| self.lookup(h, field, field_name).is_some())
                        .take(1)
                        .collect(),
                    _ => hosts,
                }
            }
            ("SELF" | "SOURCE" | "TARGET" | "HOST", _) => {
                tracing::trace!(reference, context = %ctx, "keyword not valid in context");
                Vec::new()
            }
            (name, ctx) => self.resolve_name(name, ctx).into_iter().collect(),
        }
    }

    /// Plain names: relationship templates shadow nodes inside a relationship context.
    fn resolve_name(&self, name: &str, ctx: &EvalContext) -> Option<Component> {
        let as_node = self.model.node_template(name).map(|_| Component {
            kind: ComponentKind::Node,
            name: name.to_string(),
        });
        let as_relationship = self.model.relationship_template(name).map(|_| Component {
            kind: ComponentKind::Relationship,
            name: name.to_string(),
        });
        let found = match ctx {
            EvalContext::Relationship { .. } => as_relationship.or(as_node),
            _ => as_node.or(as_relationship),
        };
        if found.is_none() {
            tracing::trace!(component = name, "component undefined");
        }
        found
    }

    fn host_of(&self, node: &str) -> Option<String> {
        let template = self.model.node_template(node)?;
        template.requirement_assignments().find_map(|(name, req)| {
            let target = req.node.as_deref()?;
            self.model.node_template(target)?;
            let hosted = name == "host"
                || req
                    .relationship
                    .as_ref()
                    .and_then(|r| self.model.relationship_type_of(r))
                    .is_some_and(|t| self.model.relationship_types.is_derived_from(t, HOSTED_ON));
            hosted.then(|| target.to_string())
        })
    }
}

fn capability_field(cap: &CapabilityAssignment, field: Field) -> &IndexMap<String, Assignment> {
    match field {
        Field::Property => &cap.properties,
        Field::Attribute => &cap.attributes,
    }
}

/// Integer segments index sequences; anything else is a map key.
fn index_value(value: &Value, segment: &str) -> Option<Value> {
    match value {
        Value::Sequence(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .cloned(),
        Value::Mapping(map) => map.get(segment).cloned(),
        Value::Tagged(tagged) => index_value(&tagged.value, segment),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::flatten::flatten_model;
    use crate::core::parser::parse_template;

    const FIXTURE: &str = r#"
node_types:
  test.Compute:
    attributes:
      ip: { type: string }
    capabilities:
      host:
        type: test.Container
        properties:
          num_cpus: { type: integer, default: 2 }
  test.App:
    properties:
      portnum: { type: integer }
    requirements:
      - host:
          capability: test.Container
          node: test.Compute
  test.Db:
    capabilities:
      database_endpoint:
        type: test.Endpoint
        properties:
          port: { type: integer, default: 5432 }
relationship_types:
  test.ConnectsTo:
    properties:
      user: { type: string, default: admin }
topology_template:
  inputs:
    greeting:
      type: string
      default: { concat: [hello, " ", world] }
    replicas:
      type: integer
      default: 3
    layout:
      default:
        zones: [a, b]
  node_templates:
    vm:
      type: test.Compute
    nodeA:
      type: test.App
      properties:
        portnum: 8080
        derived: { get_property: [SELF, portnum] }
        ports: [80, { get_input: replicas }]
        settings:
          db:
            host: db.local
        looping: { get_property: [SELF, looping] }
        url: { concat: ["http://", { get_attribute: [HOST, ip] }, ":", { get_property: [SELF, portnum] }] }
      requirements:
        - host: vm
        - database:
            node: db
            capability: database_endpoint
            relationship: conn
    db:
      type: test.Db
    conn:
      type: test.Db
  relationship_templates:
    conn:
      type: test.ConnectsTo
      properties:
        peer: { get_property: [TARGET, name] }
  outputs:
    endpoint:
      value: { get_property: [nodeA, url] }
    cpus:
      value: { get_property: [vm, host, num_cpus] }
"#;

    fn model() -> FlattenedModel {
        let template = parse_template(FIXTURE).unwrap();
        flatten_model(&template, &PlanPolicy::default()).unwrap()
    }

    fn func(name: FunctionName, args: &[&str]) -> Assignment {
        Assignment::function(name, args.iter().map(|a| Assignment::literal(*a)).collect())
    }

    fn self_a() -> EvalContext {
        EvalContext::node("nodeA")
    }

    #[test]
    fn test_tp005_literal_and_constraint_unchanged() {
        let model = model();
        let ev = Evaluator::new(&model);
        assert_eq!(ev.evaluate(&Assignment::literal(5), &self_a()), Some(Value::from(5)));
        let clause: Assignment = serde_yaml_ng::from_str("{ in_range: [1, 4] }").unwrap();
        assert_eq!(ev.evaluate(&clause, &self_a()), Some(clause.to_value()));
    }

    #[test]
    fn test_tp005_concat() {
        let model = model();
        let ev = Evaluator::new(&model);
        let a = func(FunctionName::Concat, &["a", "b"]);
        assert_eq!(ev.evaluate(&a, &self_a()), Some(Value::from("ab")));
    }

    #[test]
    fn test_tp005_concat_skips_undefined_and_stringifies_numbers() {
        let model = model();
        let ev = Evaluator::new(&model);
        let a = Assignment::function(
            FunctionName::Concat,
            vec![
                Assignment::literal("x"),
                func(FunctionName::GetProperty, &["ghost", "p"]),
                Assignment::literal(42),
            ],
        );
        assert_eq!(ev.evaluate(&a, &self_a()), Some(Value::from("x42")));
    }

    #[test]
    fn test_tp005_get_property_named_node() {
        let model = model();
        let ev = Evaluator::new(&model);
        let a = func(FunctionName::GetProperty, &["nodeA", "portnum"]);
        assert_eq!(ev.evaluate(&a, &EvalContext::node("vm")), Some(Value::from(8080)));
        let missing = func(FunctionName::GetProperty, &["nodeZ", "portnum"]);
        assert_eq!(ev.evaluate(&missing, &EvalContext::node("vm")), None);
        let no_prop = func(FunctionName::GetProperty, &["nodeA", "nothing"]);
        assert_eq!(ev.evaluate(&no_prop, &EvalContext::node("vm")), None);
    }

    #[test]
    fn test_tp005_target_context_for_nested_functions() {
        let model = model();
        let ev = Evaluator::new(&model);
        // SELF inside nodeA's property means nodeA even when called from vm.
        let a = func(FunctionName::GetProperty, &["nodeA", "derived"]);
        assert_eq!(ev.evaluate(&a, &EvalContext::node("vm")), Some(Value::from(8080)));
    }

    #[test]
    fn test_tp005_host_attribute_before_and_after_set() {
        let model = model();
        let ev = Evaluator::new(&model);
        let a = func(FunctionName::GetAttribute, &["HOST", "ip"]);
        assert_eq!(ev.evaluate(&a, &self_a()), None);

        model.set_attribute(ComponentKind::Node, "vm", "ip", Value::from("10.0.0.5"));
        assert_eq!(ev.evaluate(&a, &self_a()), Some(Value::from("10.0.0.5")));
        let url = func(FunctionName::GetProperty, &["SELF", "url"]);
        assert_eq!(
            ev.evaluate(&url, &self_a()),
            Some(Value::from("http://10.0.0.5:8080"))
        );
    }

    #[test]
    fn test_tp005_host_chain() {
        let model = model();
        let ev = Evaluator::new(&model);
        assert_eq!(ev.host_chain("nodeA"), vec!["vm"]);
        assert!(ev.host_chain("vm").is_empty());
    }

    #[test]
    fn test_tp005_get_input_raw_and_evaluated() {
        let model = model();
        let ev = Evaluator::new(&model);
        let raw = ev.input("greeting", InputMode::Raw).unwrap();
        assert!(raw.is_function());
        assert_eq!(
            ev.input("greeting", InputMode::Evaluated),
            Some(Assignment::literal("hello world"))
        );
        assert_eq!(ev.input("missing", InputMode::Evaluated), None);

        let a = func(FunctionName::GetInput, &["greeting"]);
        assert_eq!(ev.evaluate(&a, &self_a()), Some(Value::from("hello world")));
    }

    #[test]
    fn test_tp005_get_input_path() {
        let model = model();
        let ev = Evaluator::new(&model);
        let a = func(FunctionName::GetInput, &["layout", "zones", "1"]);
        assert_eq!(ev.evaluate(&a, &self_a()), Some(Value::from("b")));
    }

    #[test]
    fn test_tp005_sequence_index_evaluates_nested_function() {
        let model = model();
        let ev = Evaluator::new(&model);
        let a = func(FunctionName::GetProperty, &["SELF", "ports", "1"]);
        assert_eq!(ev.evaluate(&a, &self_a()), Some(Value::from(3)));
        let out_of_range = func(FunctionName::GetProperty, &["SELF", "ports", "7"]);
        assert_eq!(ev.evaluate(&out_of_range, &self_a()), None);
    }

    #[test]
    fn test_tp005_map_path() {
        let model = model();
        let ev = Evaluator::new(&model);
        let a = func(FunctionName::GetProperty, &["SELF", "settings", "db", "host"]);
        assert_eq!(ev.evaluate(&a, &self_a()), Some(Value::from("db.local")));
    }

    #[test]
    fn test_tp005_capability_through_requirement() {
        let model = model();
        let ev = Evaluator::new(&model);
        let a = func(FunctionName::GetProperty, &["SELF", "database", "port"]);
        assert_eq!(ev.evaluate(&a, &self_a()), Some(Value::from(5432)));
    }

    #[test]
    fn test_tp005_own_capability() {
        let model = model();
        let ev = Evaluator::new(&model);
        let a = func(FunctionName::GetProperty, &["vm", "host", "num_cpus"]);
        assert_eq!(ev.evaluate(&a, &self_a()), Some(Value::from(2)));
    }

    #[test]
    fn test_tp005_source_and_target() {
        let model = model();
        let ev = Evaluator::new(&model);
        let rel = EvalContext::relationship("conn");
        let user = func(FunctionName::GetProperty, &["SELF", "user"]);
        assert_eq!(ev.evaluate(&user, &rel), Some(Value::from("admin")));
        assert_eq!(
            ev.relationship_endpoints("conn"),
            Some(("nodeA".to_string(), "db".to_string()))
        );
        let src = func(FunctionName::GetProperty, &["SOURCE", "portnum"]);
        assert_eq!(ev.evaluate(&src, &rel), Some(Value::from(8080)));

        let explicit = EvalContext::Relationship {
            name: "conn".into(),
            source: Some("vm".into()),
            target: None,
        };
        assert_eq!(ev.evaluate(&src, &explicit), None);

        // SOURCE means nothing outside a relationship.
        assert_eq!(ev.evaluate(&src, &self_a()), None);
    }

    #[test]
    fn test_tp005_scope_prefers_relationship_in_relationship_context() {
        let model = model();
        let ev = Evaluator::new(&model);
        let a = func(FunctionName::GetProperty, &["conn", "user"]);
        assert_eq!(ev.evaluate(&a, &EvalContext::relationship("conn")), Some(Value::from("admin")));
        // From a node, `conn` is the node template, which has no `user`.
        assert_eq!(ev.evaluate(&a, &self_a()), None);
    }

    #[test]
    fn test_tp005_self_reference_is_undefined() {
        let model = model();
        let ev = Evaluator::new(&model);
        let a = func(FunctionName::GetProperty, &["SELF", "looping"]);
        assert_eq!(ev.evaluate(&a, &self_a()), None);
    }

    #[test]
    fn test_tp005_fan_out_self_reference_finishes() {
        let yaml = r#"
node_types:
  test.Node: {}
topology_template:
  node_templates:
    n:
      type: test.Node
      properties:
        a:
          concat:
            - { get_property: [SELF, a] }
            - { get_property: [SELF, a] }
            - { get_property: [SELF, a] }
            - { get_property: [SELF, a] }
        b: { concat: [x, { get_property: [SELF, c] }, { get_property: [SELF, c] }] }
        c: { concat: [y, { get_property: [SELF, b] }, { get_property: [SELF, b] }] }
"#;
        let model = flatten_model(&parse_template(yaml).unwrap(), &PlanPolicy::default()).unwrap();
        let ev = Evaluator::new(&model);
        let ctx = EvalContext::node("n");

        let started = std::time::Instant::now();
        // Each inner reference is undefined, and concat skips undefined parts.
        let a = func(FunctionName::GetProperty, &["SELF", "a"]);
        assert_eq!(ev.evaluate(&a, &ctx), Some(Value::from("")));
        let b = func(FunctionName::GetProperty, &["SELF", "b"]);
        assert_eq!(ev.evaluate(&b, &ctx), Some(Value::from("xyy")));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }

    #[test]
    fn test_tp005_depth_guard() {
        let mut yaml = String::from("node_types:\n  test.Node: {}\ntopology_template:\n  node_templates:\n    n:\n      type: test.Node\n      properties:\n");
        for i in 0..12 {
            yaml.push_str(&format!("        p{i}: {{ get_property: [SELF, p{}] }}\n", i + 1));
        }
        yaml.push_str("        p12: end\n");
        let model = flatten_model(&parse_template(&yaml).unwrap(), &PlanPolicy::default()).unwrap();
        let a = func(FunctionName::GetProperty, &["SELF", "p0"]);
        let ctx = EvalContext::node("n");

        assert_eq!(Evaluator::new(&model).evaluate(&a, &ctx), Some(Value::from("end")));
        assert_eq!(Evaluator::new(&model).with_max_depth(8).evaluate(&a, &ctx), None);
    }

    #[test]
    fn test_tp005_host_through_hosted_on_relationship() {
        let yaml = r#"
relationship_types:
  tosca.relationships.HostedOn: {}
  my.RunsOn:
    derived_from: tosca.relationships.HostedOn
node_types:
  test.Machine:
    attributes:
      ip: { type: string }
  test.Service: {}
topology_template:
  node_templates:
    vm:
      type: test.Machine
    svc:
      type: test.Service
      requirements:
        - runtime:
            node: vm
            relationship: my.RunsOn
"#;
        let model = flatten_model(&parse_template(yaml).unwrap(), &PlanPolicy::default()).unwrap();
        let ev = Evaluator::new(&model);
        let ctx = EvalContext::node("svc");
        let host_ip = func(FunctionName::GetAttribute, &["HOST", "ip"]);

        assert_eq!(ev.host_chain("svc"), vec!["vm"]);
        assert_eq!(ev.evaluate(&host_ip, &ctx), None);
        model.set_attribute(ComponentKind::Node, "vm", "ip", Value::from("1.1.1.1"));
        assert_eq!(ev.evaluate(&host_ip, &ctx), Some(Value::from("1.1.1.1")));
    }

    #[test]
    fn test_tp005_recognized_only_functions_are_undefined() {
        let model = model();
        let ev = Evaluator::new(&model);
        let a = func(FunctionName::GetOperationOutput, &["SELF", "Standard", "create", "out"]);
        assert_eq!(ev.evaluate(&a, &self_a()), None);
    }

    #[test]
    fn test_tp005_strict_evaluation() {
        let model = model();
        let ev = Evaluator::new(&model);
        let a = func(FunctionName::GetProperty, &["nodeZ", "portnum"]);
        let err = ev.evaluate_strict(&a, &self_a()).unwrap_err();
        assert!(matches!(err, TopologyError::UnresolvedReference { .. }));
        assert!(err.to_string().contains("nodeZ"));
    }

    #[test]
    fn test_tp005_empty_string_is_not_undefined() {
        let model = model();
        let ev = Evaluator::new(&model);
        let a = Assignment::function(FunctionName::Concat, vec![]);
        assert_eq!(ev.evaluate(&a, &self_a()), Some(Value::from("")));
    }

    #[test]
    fn test_tp005_resolve_outputs() {
        let model = model();
        model.set_attribute(ComponentKind::Node, "vm", "ip", Value::from("10.1.1.1"));
        let outputs = Evaluator::new(&model).resolve_outputs();
        assert_eq!(outputs["endpoint"], Some(Value::from("http://10.1.1.1:8080")));
        assert_eq!(outputs["cpus"], Some(Value::from(2)));
    }

    #[test]
    fn test_tp005_concurrent_readers_with_setter() {
        let model = model();
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let ev = Evaluator::new(&model);
                    let a = func(FunctionName::GetProperty, &["nodeA", "portnum"]);
                    assert_eq!(ev.evaluate(&a, &self_a()), Some(Value::from(8080)));
                });
            }
            s.spawn(|| {
                model.set_attribute(ComponentKind::Node, "vm", "ip", Value::from("1.2.3.4"));
            });
        });
    }
}
