//! Dependency analysis: bidirectional graph, DFS grouping, topological ranks.
//!
//! Nodes are indexed by name; fathers are the apps a node depends on and
//! children are the apps depending on it. Edges to names outside the
//! analysed set are skipped, so the same code groups a cloud's subset as
//! well as a whole batch.

use std::collections::{BTreeMap, BTreeSet};

use crate::application::Application;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepNode {
    pub fathers: BTreeSet<String>,
    pub children: BTreeSet<String>,
}

/// Build fathers and children for every app of `apps`.
pub fn bidirectional(apps: &BTreeMap<String, Application>) -> BTreeMap<String, DepNode> {
    let mut graph: BTreeMap<String, DepNode> = apps.keys().map(|name| (name.clone(), DepNode::default())).collect();

    for (name, app) in apps {
        for dep in &app.dependencies {
            if !graph.contains_key(dep) {
                continue;
            }
            if let Some(node) = graph.get_mut(name) {
                node.fathers.insert(dep.clone());
            }
            if let Some(node) = graph.get_mut(dep) {
                node.children.insert(name.clone());
            }
        }
    }

    graph
}

/// Connected components of the undirected dependency graph.
///
/// Start points are taken in `order`; apps missing from `order` follow in
/// name order. Within a component, fathers are visited before children.
pub fn group_by_dep(apps: &BTreeMap<String, Application>, order: &[String]) -> Vec<Vec<String>> {
    let graph = bidirectional(apps);
    let mut visited: BTreeSet<String> = BTreeSet::new();
    let mut groups = Vec::new();

    let starts = order
        .iter()
        .filter(|name| graph.contains_key(*name))
        .chain(graph.keys().filter(|name| !order.contains(*name)));

    for start in starts {
        if visited.contains(start) {
            continue;
        }
        let mut group = Vec::new();
        dfs(&graph, start, &mut visited, &mut group);
        groups.push(group);
    }

    groups
}

fn dfs(graph: &BTreeMap<String, DepNode>, name: &str, visited: &mut BTreeSet<String>, group: &mut Vec<String>) {
    visited.insert(name.to_string());
    group.push(name.to_string());

    let Some(node) = graph.get(name) else {
        return;
    };
    for next in node.fathers.iter().chain(node.children.iter()) {
        if !visited.contains(next) {
            dfs(graph, next, visited, group);
        }
    }
}

/// Topological ranks: first the apps with no dependencies, then the apps
/// depending only on those, and so on.
///
/// Returns the ranks peeled so far and `true` if a cycle stopped the peeling.
pub fn topo_sort(apps: &BTreeMap<String, Application>, order: &[String]) -> (Vec<Vec<String>>, bool) {
    let graph = bidirectional(apps);
    let mut remaining_deps: BTreeMap<&str, usize> =
        graph.iter().map(|(name, node)| (name.as_str(), node.fathers.len())).collect();

    let ordered: Vec<&str> = order
        .iter()
        .map(String::as_str)
        .filter(|name| graph.contains_key(*name))
        .chain(graph.keys().map(String::as_str).filter(|name| !order.iter().any(|o| o.as_str() == *name)))
        .collect();

    let mut ranks = Vec::new();
    while !remaining_deps.is_empty() {
        let rank: Vec<String> = ordered
            .iter()
            .filter(|name| remaining_deps.get(**name) == Some(&0))
            .map(|name| name.to_string())
            .collect();
        if rank.is_empty() {
            return (ranks, true);
        }
        for name in &rank {
            remaining_deps.remove(name.as_str());
            if let Some(node) = graph.get(name) {
                for child in &node.children {
                    if let Some(count) = remaining_deps.get_mut(child.as_str()) {
                        *count = count.saturating_sub(1);
                    }
                }
            }
        }
        ranks.push(rank);
    }

    (ranks, false)
}

/// Check dependency edges of a whole batch.
///
/// Missing targets and edges towards a lower priority are reported first;
/// the cycle check runs only when those pass.
pub fn check_dependencies(apps: &BTreeMap<String, Application>, order: &[String]) -> Vec<String> {
    let mut errors = Vec::new();
    for (name, app) in apps {
        for dep in &app.dependencies {
            match apps.get(dep) {
                None => errors.push(format!(
                    "application {name} depends on application {dep}, which is not in this request"
                )),
                Some(target) if target.priority < app.priority => errors.push(format!(
                    "application {name} (priority {}) depends on application {dep} (priority {}); \
                     an application must not depend on one with a lower priority",
                    app.priority, target.priority
                )),
                Some(_) => {}
            }
        }
    }

    if errors.is_empty() {
        let (_, has_cycle) = topo_sort(apps, order);
        if has_cycle {
            errors.push("the dependencies among the applications contain a cycle".to_string());
        }
    }

    errors
}
