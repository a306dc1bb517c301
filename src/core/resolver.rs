//! TP-008: Topological ordering of plays and components.
//!
//! Kahn's algorithm with deterministic tie-breaking: among ready vertices the
//! lowest play id runs first in the lifecycle graph, the alphabetically first
//! name in the component graph. Waves group
//! plays whose dependencies are all satisfied, for executors that run
//! independent branches concurrently.

use super::error::{Result, TopologyError};
use super::types::*;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Play ids in an order that respects every edge.
pub fn execution_order(playbook: &Playbook) -> Result<Vec<usize>> {
    let mut in_degree = in_degrees(playbook);

    let mut ready: BinaryHeap<Reverse<usize>> = (0..in_degree.len())
        .filter(|&v| in_degree[v] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(in_degree.len());

    while let Some(Reverse(current)) = ready.pop() {
        order.push(current);

        for &next in playbook.successors(current) {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() != playbook.plays.len() {
        return Err(cycle_error(playbook, &in_degree));
    }
    Ok(order)
}

/// Successive sets of plays whose predecessors all ran in earlier waves.
pub fn execution_waves(playbook: &Playbook) -> Result<Vec<Vec<usize>>> {
    let mut in_degree = in_degrees(playbook);
    let mut wave: Vec<usize> = (0..in_degree.len()).filter(|&v| in_degree[v] == 0).collect();
    let mut waves = Vec::new();
    let mut placed = 0;

    while !wave.is_empty() {
        placed += wave.len();
        let mut next_wave = Vec::new();
        for &v in &wave {
            for &next in playbook.successors(v) {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    next_wave.push(next);
                }
            }
        }
        next_wave.sort_unstable();
        waves.push(std::mem::replace(&mut wave, next_wave));
    }

    if placed != playbook.plays.len() {
        return Err(cycle_error(playbook, &in_degree));
    }
    Ok(waves)
}

/// Components ordered so every requirement target precedes its dependents.
pub fn component_order(graph: &ComponentGraph) -> Result<Vec<String>> {
    let mut in_degree: HashMap<&str, usize> = graph.nodes.iter().map(|n| (n.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for edge in &graph.edges {
        if !in_degree.contains_key(edge.source.as_str()) || !in_degree.contains_key(edge.target.as_str()) {
            continue;
        }
        dependents
            .entry(edge.target.as_str())
            .or_default()
            .push(edge.source.as_str());
        *in_degree.entry(edge.source.as_str()).or_default() += 1;
    }

    // Kahn's algorithm with sorted tie-breaking
    let mut ready: BinaryHeap<Reverse<&str>> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(n, _)| Reverse(*n))
        .collect();

    let mut order = Vec::new();
    while let Some(Reverse(current)) = ready.pop() {
        order.push(current.to_string());

        for &dependent in dependents.get(current).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }
    }

    if order.len() != graph.nodes.len() {
        let mut members: Vec<String> = in_degree
            .iter()
            .filter(|(_, &d)| d > 0)
            .map(|(n, _)| n.to_string())
            .collect();
        members.sort();
        return Err(TopologyError::DependencyCycle { members });
    }
    Ok(order)
}

fn in_degrees(playbook: &Playbook) -> Vec<usize> {
    let mut in_degree = vec![0usize; playbook.plays.len()];
    for successors in &playbook.adjacency {
        for &next in successors {
            in_degree[next] += 1;
        }
    }
    in_degree
}

fn cycle_error(playbook: &Playbook, in_degree: &[usize]) -> TopologyError {
    let members = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d > 0)
        .map(|(v, _)| playbook.plays[v].label())
        .collect();
    TopologyError::DependencyCycle { members }
}
