//! TP-007: Plan generation. Lifecycle graph over the flattened topology.
//!
//! One vertex per implemented (component, operation), canonical stages
//! chained create -> configure -> start -> stop -> delete, cross-node edges
//! for every resolved requirement, and START/STOP sentinels closing the graph.

use super::assignment::Assignment;
use super::error::{Result, TopologyError};
use super::eval::{Evaluator, InputMode};
use super::flatten::{flatten_model, FlattenedModel};
use super::types::*;
use indexmap::IndexMap;
use std::collections::BTreeMap;

const BRING_UP: [Stage; 3] = [Stage::Create, Stage::Configure, Stage::Start];
const TEARDOWN_DEPENDENT: [Stage; 2] = [Stage::Delete, Stage::Stop];
const TEARDOWN_TARGET: [Stage; 2] = [Stage::Stop, Stage::Delete];

/// Parse-free pipeline: flatten, then plan.
pub fn plan_template(template: &ServiceTemplate, policy: &PlanPolicy) -> Result<Playbook> {
    let model = flatten_model(template, policy)?;
    build_plan(&model, policy)
}

/// Build the playbook for a flattened model.
pub fn build_plan(model: &FlattenedModel, policy: &PlanPolicy) -> Result<Playbook> {
    check_inputs(model, policy)?;
    let topology = component_graph(model);

    let mut graph = LifecycleGraph::default();
    let start = graph.add(Play {
        id: 0,
        kind: PlayKind::Start,
        component: String::new(),
        interface: None,
        operation: "START".to_string(),
        stage: None,
        implementation: None,
        inputs: IndexMap::new(),
    });

    let mut stages: IndexMap<&str, BTreeMap<Stage, usize>> = IndexMap::new();
    for (name, template) in &model.topology.node_templates {
        let selected = select_operations(name, template, policy)?;
        let node_stages = graph.add_component(name, selected);
        stages.insert(name.as_str(), node_stages);
    }

    for edge in &topology.edges {
        let (Some(dependent), Some(target)) = (stages.get(edge.source.as_str()), stages.get(edge.target.as_str()))
        else {
            continue;
        };
        if let (Some(from), Some(to)) = (last_present(target, &BRING_UP), first_present(dependent, &BRING_UP)) {
            graph.edge(from, to);
        }
        if let (Some(from), Some(to)) = (
            first_present(dependent, &TEARDOWN_DEPENDENT),
            first_present(target, &TEARDOWN_TARGET),
        ) {
            graph.edge(from, to);
        }
    }

    let stop = graph.add(Play {
        id: 0,
        kind: PlayKind::Stop,
        component: String::new(),
        interface: None,
        operation: "STOP".to_string(),
        stage: None,
        implementation: None,
        inputs: IndexMap::new(),
    });
    graph.close(start, stop);

    let playbook = Playbook {
        adjacency: graph.adjacency(),
        plays: graph.plays,
        start,
        stop,
        topology,
        inputs: model.topology.inputs.clone(),
        outputs: model.topology.outputs.clone(),
        workflows: model.topology.workflows.clone(),
    };
    tracing::debug!(
        plays = playbook.plays.len(),
        edges = playbook.edge_count(),
        components = playbook.topology.nodes.len(),
        "plan built"
    );
    Ok(playbook)
}

/// One vertex per node template, one edge per usable requirement.
pub fn component_graph(model: &FlattenedModel) -> ComponentGraph {
    let mut graph = ComponentGraph {
        nodes: model.topology.node_templates.keys().cloned().collect(),
        edges: Vec::new(),
    };

    for (source, template) in &model.topology.node_templates {
        for (requirement, req) in template.requirement_assignments() {
            let Some(target) = req.node.as_deref() else {
                tracing::debug!(node = %source, requirement, "requirement unbound; no edge");
                continue;
            };
            if !model.topology.node_templates.contains_key(target) {
                tracing::warn!(node = %source, requirement, unknown = target, "requirement target is not a node template; no edge");
                continue;
            }
            if target == source {
                tracing::warn!(node = %source, requirement, "requirement targets its own node; no edge");
                continue;
            }
            if req.capability.is_none() && req.relationship.is_none() {
                tracing::warn!(node = %source, requirement, "requirement has neither capability nor relationship; no edge");
                continue;
            }
            graph.edges.push(RequirementEdge {
                source: source.clone(),
                target: target.to_string(),
                requirement: requirement.to_string(),
                capability: req.capability.clone(),
                relationship: req
                    .relationship
                    .as_ref()
                    .and_then(|r| model.relationship_type_of(r))
                    .map(String::from),
            });
        }
    }
    graph
}

/// An implemented operation chosen for the plan.
#[derive(Debug, Clone)]
struct Selected {
    interface: String,
    operation: String,
    definition: OperationDefinition,
    inputs: IndexMap<String, Assignment>,
}

impl Selected {
    fn qualified(&self) -> String {
        format!("{}.{}", self.interface, self.operation)
    }
}

#[derive(Debug, Default)]
struct Selection {
    stages: BTreeMap<Stage, Selected>,
    custom: Vec<Selected>,
}

/// Pick one implementation per canonical stage under the duplicate-stage policy.
fn select_operations(component: &str, template: &NodeTemplate, policy: &PlanPolicy) -> Result<Selection> {
    let mut selection = Selection::default();

    for (iname, iface) in &template.interfaces {
        for (oname, op) in &iface.operations {
            if !op.is_implemented() {
                continue;
            }
            let mut inputs = iface.inputs.clone();
            inputs.extend(op.inputs.clone());
            let candidate = Selected {
                interface: iname.clone(),
                operation: oname.clone(),
                definition: op.clone(),
                inputs,
            };

            let Some(stage) = Stage::parse(oname) else {
                selection.custom.push(candidate);
                continue;
            };
            let Some(existing) = selection.stages.get(&stage).map(Selected::qualified) else {
                selection.stages.insert(stage, candidate);
                continue;
            };
            match policy.duplicate_stage {
                DuplicateStagePolicy::FirstWins => {
                    tracing::debug!(component, %stage, kept = %existing, dropped = %candidate.qualified(), "duplicate stage operation");
                }
                DuplicateStagePolicy::LastWins => {
                    tracing::debug!(component, %stage, kept = %candidate.qualified(), dropped = %existing, "duplicate stage operation");
                    selection.stages.insert(stage, candidate);
                }
                DuplicateStagePolicy::Strict => {
                    return Err(TopologyError::DuplicateOperation {
                        component: component.to_string(),
                        stage: stage.to_string(),
                        first: existing,
                        second: candidate.qualified(),
                    });
                }
            }
        }
    }
    Ok(selection)
}

fn check_inputs(model: &FlattenedModel, policy: &PlanPolicy) -> Result<()> {
    let evaluator = Evaluator::for_policy(model, policy);
    for (name, param) in &model.topology.inputs {
        if !param.required.unwrap_or(true) {
            continue;
        }
        if evaluator.input(name, InputMode::Evaluated).is_some() {
            continue;
        }
        if policy.strict_inputs {
            return Err(TopologyError::UnresolvedReference {
                reference: format!("input '{name}'"),
            });
        }
        tracing::warn!(input = %name, "required input has no value");
    }
    Ok(())
}

fn first_present(stages: &BTreeMap<Stage, usize>, order: &[Stage]) -> Option<usize> {
    order.iter().find_map(|s| stages.get(s).copied())
}

fn last_present(stages: &BTreeMap<Stage, usize>, order: &[Stage]) -> Option<usize> {
    order.iter().rev().find_map(|s| stages.get(s).copied())
}

#[derive(Debug, Default)]
struct LifecycleGraph {
    plays: Vec<Play>,
    edges: Vec<(usize, usize)>,
}

impl LifecycleGraph {
    fn add(&mut self, mut play: Play) -> usize {
        let id = self.plays.len();
        play.id = id;
        self.plays.push(play);
        id
    }

    fn edge(&mut self, from: usize, to: usize) {
        self.edges.push((from, to));
    }

    /// Canonical stages chained in order, custom operations hung off the last bring-up stage.
    fn add_component(&mut self, component: &str, selection: Selection) -> BTreeMap<Stage, usize> {
        let mut ids = BTreeMap::new();
        let mut previous = None;
        for (stage, selected) in selection.stages {
            let id = self.add(play_for(component, Some(stage), selected));
            if let Some(prev) = previous {
                self.edge(prev, id);
            }
            previous = Some(id);
            ids.insert(stage, id);
        }

        let anchor = last_present(&ids, &BRING_UP);
        for selected in selection.custom {
            let id = self.add(play_for(component, None, selected));
            if let Some(anchor) = anchor {
                self.edge(anchor, id);
            }
        }
        ids
    }

    /// Entry and exit sentinels for every dangling vertex.
    fn close(&mut self, start: usize, stop: usize) {
        let mut has_in = vec![false; self.plays.len()];
        let mut has_out = vec![false; self.plays.len()];
        for &(from, to) in &self.edges {
            has_out[from] = true;
            has_in[to] = true;
        }
        let inner: Vec<usize> = (0..self.plays.len()).filter(|&v| v != start && v != stop).collect();
        if inner.is_empty() {
            self.edge(start, stop);
            return;
        }
        for v in inner {
            if !has_in[v] {
                self.edge(start, v);
            }
            if !has_out[v] {
                self.edge(v, stop);
            }
        }
    }

    fn adjacency(&self) -> Vec<Vec<usize>> {
        let mut adjacency = vec![Vec::new(); self.plays.len()];
        for &(from, to) in &self.edges {
            adjacency[from].push(to);
        }
        for successors in &mut adjacency {
            successors.sort_unstable();
            successors.dedup();
        }
        adjacency
    }
}

fn play_for(component: &str, stage: Option<Stage>, selected: Selected) -> Play {
    Play {
        id: 0,
        kind: PlayKind::Operation,
        component: component.to_string(),
        interface: Some(selected.interface),
        operation: selected.operation,
        stage,
        implementation: selected.definition.implementation,
        inputs: selected.inputs,
    }
}

impl Playbook {
    /// The play for a component's operation.
    pub fn find(&self, component: &str, operation: &str) -> Option<&Play> {
        self.plays
            .iter()
            .find(|p| p.kind == PlayKind::Operation && p.component == component && p.operation == operation)
    }

    pub fn successors(&self, id: usize) -> &[usize] {
        self.adjacency.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn predecessors(&self, id: usize) -> Vec<usize> {
        self.adjacency
            .iter()
            .enumerate()
            .filter(|(_, succ)| succ.binary_search(&id).is_ok())
            .map(|(from, _)| from)
            .collect()
    }

    pub fn has_edge(&self, from: usize, to: usize) -> bool {
        self.successors(from).binary_search(&to).is_ok()
    }

    pub fn edge_count(&self) -> usize {
        self.adjacency.iter().map(Vec::len).sum()
    }

    /// Operation plays only, sentinels excluded.
    pub fn operations(&self) -> impl Iterator<Item = &Play> {
        self.plays.iter().filter(|p| p.kind == PlayKind::Operation)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parser::parse_template;

    const TYPES: &str = r#"
node_types:
  test.Component:
    requirements:
      - dependency:
          capability: test.Feature
          relationship: test.DependsOn
    interfaces:
      Standard:
        create: create.sh
        configure: configure.sh
        start: start.sh
        stop: stop.sh
        delete: delete.sh
  test.Partial:
    interfaces:
      Standard:
        create: create.sh
        configure:
        delete: delete.sh
"#;

    fn plan_yaml(topology: &str, policy: &PlanPolicy) -> Result<Playbook> {
        let template = parse_template(&format!("{TYPES}{topology}")).unwrap();
        plan_template(&template, policy)
    }

    fn plan(topology: &str) -> Playbook {
        plan_yaml(topology, &PlanPolicy::default()).unwrap()
    }

    fn id(pb: &Playbook, component: &str, op: &str) -> usize {
        pb.find(component, op).unwrap().id
    }

    fn assert_sentinels_close(pb: &Playbook) {
        for play in pb.operations() {
            if pb.predecessors(play.id).is_empty() {
                panic!("{play} has no predecessor");
            }
            if pb.successors(play.id).is_empty() {
                panic!("{play} has no successor");
            }
        }
        assert!(pb.predecessors(pb.start).is_empty());
        assert!(pb.successors(pb.stop).is_empty());
    }

    const A_REQUIRES_B: &str = r#"
topology_template:
  node_templates:
    A:
      type: test.Component
      requirements:
        - dependency: B
    B:
      type: test.Component
"#;

    #[test]
    fn test_tp007_cross_node_edges() {
        let pb = plan(A_REQUIRES_B);
        assert!(pb.has_edge(id(&pb, "B", "start"), id(&pb, "A", "create")));
        assert!(pb.has_edge(id(&pb, "A", "delete"), id(&pb, "B", "stop")));
        assert_eq!(pb.topology.edges.len(), 1);
        assert_eq!(pb.topology.edges[0].relationship.as_deref(), Some("test.DependsOn"));
    }

    #[test]
    fn test_tp007_stage_chain() {
        let pb = plan(A_REQUIRES_B);
        let chain = ["create", "configure", "start", "stop", "delete"];
        for pair in chain.windows(2) {
            assert!(pb.has_edge(id(&pb, "B", pair[0]), id(&pb, "B", pair[1])));
        }
    }

    #[test]
    fn test_tp007_sentinels() {
        let pb = plan(A_REQUIRES_B);
        assert_eq!(pb.start, 0);
        assert_eq!(pb.stop, pb.plays.len() - 1);
        assert!(pb.has_edge(pb.start, id(&pb, "B", "create")));
        assert!(!pb.has_edge(pb.start, id(&pb, "A", "create")));
        assert!(pb.has_edge(id(&pb, "B", "delete"), pb.stop));
        assert!(!pb.has_edge(id(&pb, "A", "delete"), pb.stop));
        assert_sentinels_close(&pb);
    }

    #[test]
    fn test_tp007_missing_stages_skipped_and_fallbacks() {
        let pb = plan(
            r#"
topology_template:
  node_templates:
    app:
      type: test.Component
      requirements:
        - dependency: base
    base:
      type: test.Partial
"#,
        );
        // `configure` has no implementation, so the chain jumps from create to delete.
        assert!(pb.find("base", "configure").is_none());
        assert!(pb.has_edge(id(&pb, "base", "create"), id(&pb, "base", "delete")));
        assert!(pb.has_edge(id(&pb, "base", "create"), id(&pb, "app", "create")));
        assert!(pb.has_edge(id(&pb, "app", "delete"), id(&pb, "base", "delete")));
        assert_sentinels_close(&pb);
    }

    #[test]
    fn test_tp007_custom_operations() {
        let pb = plan(
            r#"
topology_template:
  node_templates:
    db:
      type: test.Component
      interfaces:
        Maintenance:
          backup: backup.sh
"#,
        );
        let backup = pb.find("db", "backup").unwrap();
        assert_eq!(backup.stage, None);
        assert_eq!(backup.interface.as_deref(), Some("Maintenance"));
        assert_eq!(backup.label(), "db:backup");
        assert!(pb.has_edge(id(&pb, "db", "start"), backup.id));
        assert!(pb.has_edge(backup.id, pb.stop));
    }

    const DUPLICATE: &str = r#"
topology_template:
  node_templates:
    web:
      type: test.Partial
      interfaces:
        Custom:
          create: other_create.sh
"#;

    #[test]
    fn test_tp007_duplicate_first_wins() {
        let pb = plan(DUPLICATE);
        let create = pb.find("web", "create").unwrap();
        assert_eq!(create.implementation.as_ref().unwrap().primary, "create.sh");
        assert_eq!(pb.operations().filter(|p| p.component == "web").count(), 2);
    }

    #[test]
    fn test_tp007_duplicate_last_wins() {
        let policy = PlanPolicy {
            duplicate_stage: DuplicateStagePolicy::LastWins,
            ..PlanPolicy::default()
        };
        let pb = plan_yaml(DUPLICATE, &policy).unwrap();
        let create = pb.find("web", "create").unwrap();
        assert_eq!(create.implementation.as_ref().unwrap().primary, "other_create.sh");
        assert_eq!(create.interface.as_deref(), Some("Custom"));
    }

    #[test]
    fn test_tp007_duplicate_strict() {
        let policy = PlanPolicy {
            duplicate_stage: DuplicateStagePolicy::Strict,
            ..PlanPolicy::default()
        };
        match plan_yaml(DUPLICATE, &policy) {
            Err(TopologyError::DuplicateOperation { component, stage, first, second }) => {
                assert_eq!(component, "web");
                assert_eq!(stage, "create");
                assert_eq!(first, "Standard.create");
                assert_eq!(second, "Custom.create");
            }
            other => panic!("expected duplicate error, got {other:?}"),
        }
    }

    #[test]
    fn test_tp007_unresolved_and_malformed_requirements() {
        let pb = plan(
            r#"
topology_template:
  node_templates:
    web:
      type: test.Partial
      requirements:
        - dependency: nowhere
        - loose: other
    other:
      type: test.Partial
"#,
        );
        // Unknown target and a requirement with no capability or relationship add no edges.
        assert!(pb.topology.edges.is_empty());
        assert!(!pb.has_edge(id(&pb, "other", "create"), id(&pb, "web", "create")));
        assert_sentinels_close(&pb);
    }

    #[test]
    fn test_tp007_empty_topology() {
        let pb = plan("topology_template: {}\n");
        assert_eq!(pb.plays.len(), 2);
        assert!(pb.has_edge(pb.start, pb.stop));
    }

    #[test]
    fn test_tp007_inputs_copied_and_checked() {
        let topology = r#"
topology_template:
  inputs:
    port:
      type: integer
      default: { concat: ["80", "80"] }
    region:
      type: string
"#;
        let pb = plan(topology);
        assert!(pb.inputs["port"].effective().unwrap().is_function());

        let strict = PlanPolicy {
            strict_inputs: true,
            ..PlanPolicy::default()
        };
        let err = plan_yaml(topology, &strict).unwrap_err();
        assert!(err.to_string().contains("region"));
    }

    #[test]
    fn test_tp007_play_inputs_overlay() {
        let pb = plan(
            r#"
topology_template:
  node_templates:
    web:
      type: test.Partial
      interfaces:
        Standard:
          inputs:
            user: root
            mode: fast
          create:
            implementation: create.sh
            inputs:
              mode: { get_input: mode }
"#,
        );
        let create = pb.find("web", "create").unwrap();
        assert_eq!(create.inputs["user"], Assignment::literal("root"));
        assert!(create.inputs["mode"].is_function());
    }

    #[test]
    fn test_tp007_to_json() {
        let pb = plan(A_REQUIRES_B);
        let json = pb.to_json().unwrap();
        assert!(json.contains("\"START\""));
        assert!(json.contains("\"adjacency\""));
    }
}
