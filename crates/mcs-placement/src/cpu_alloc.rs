//! CPU allocation inside each VM of a plan.
//!
//! Memory and storage were already checked by the VM allocator against full
//! requests, and CPU against the floor of one step per app. What is left is
//! splitting each VM's residual cores between the apps placed on it.

use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::SchedRng;
use crate::application::Application;
use crate::cloud::{Cloud, K8sNode};
use crate::error::{PlacementError, PlacementResult};
use crate::problem::Problem;
use crate::resources::{FLOAT_DELTA, GenericResources, snap_to_step};
use crate::solution::Solution;

/// Weighted allocation for the production refiner.
pub fn allocate_cpus(problem: &Problem, with_vm: &Solution) -> PlacementResult<Solution> {
    let step = problem.cpu_core_step();
    allocate_with(problem, with_vm, |residual, apps| {
        weighted_cpu_allocation(residual, apps, step)
    })
}

/// Random allocation for the comparison refiner.
pub fn allocate_cpus_random(problem: &Problem, with_vm: &Solution, rng: &mut SchedRng) -> PlacementResult<Solution> {
    let step = problem.cpu_core_step();
    allocate_with(problem, with_vm, |residual, apps| {
        Ok(random_cpu_allocation(residual, apps, step, rng))
    })
}

fn allocate_with(
    problem: &Problem,
    with_vm: &Solution,
    mut per_vm: impl FnMut(f64, &[&Application]) -> PlacementResult<Vec<(String, f64)>>,
) -> PlacementResult<Solution> {
    let mut with_cpu = with_vm.clone();

    for cloud in problem.clouds.values() {
        for (node, names) in group_by_node(with_vm, &cloud.name, &problem.order) {
            let residual = vm_residual(cloud, with_vm, &node)?;
            let apps: Vec<&Application> = names.iter().filter_map(|name| problem.apps.get(name)).collect();
            for (name, cpu) in per_vm(residual.cpu_core, &apps)? {
                if let Some(gene) = with_cpu.apps_solution.get_mut(&name) {
                    gene.allocated_cpu_core = cpu;
                }
            }
        }
    }

    Ok(with_cpu)
}

/// Accepted apps of `cloud` grouped by node, both in order of first appearance.
pub(crate) fn group_by_node(plan: &Solution, cloud: &str, order: &[String]) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for name in plan.apps_on_cloud(cloud, order) {
        let Some(node) = plan.get(&name).map(|gene| gene.k8s_node.clone()) else {
            continue;
        };
        match groups.iter_mut().find(|(n, _)| *n == node) {
            Some((_, members)) => members.push(name),
            None => groups.push((node, vec![name])),
        }
    }
    groups
}

/// Residual of `node`: an existing node of `cloud` or a VM the plan creates there.
pub fn vm_residual(cloud: &Cloud, plan: &Solution, node: &str) -> PlacementResult<GenericResources> {
    let existing = cloud.k8s_nodes.iter().filter(|n| n.name == node).map(|n| n.residual);
    let created = plan
        .vms_on_cloud(&cloud.name)
        .filter(|vm| vm.name == node)
        .map(|vm| K8sNode::from_vm(vm).residual);
    let matches: Vec<GenericResources> = existing.chain(created).collect();

    match matches.as_slice() {
        [one] => Ok(*one),
        _ => Err(PlacementError::invariant(format!(
            "node {node:?} on cloud {} matched {} times among existing nodes and VMs to create",
            cloud.name,
            matches.len()
        ))),
    }
}

fn share_of(residual: f64, weight: f64, total_weight: f64, count: usize) -> f64 {
    if total_weight > 0.0 {
        residual * weight / total_weight
    } else {
        residual / count.max(1) as f64
    }
}

/// Split `residual` cores between `apps` by `priority × request`.
///
/// Apps whose share would not exceed one step get exactly one step; the rest
/// share what remains, snapped to the step grid and capped at their request.
/// Cores freed by that cap go back round to the apps still below their
/// request. When the residual covers every request each app simply gets its
/// request.
pub fn weighted_cpu_allocation(
    residual: f64,
    apps: &[&Application],
    step: f64,
) -> PlacementResult<Vec<(String, f64)>> {
    let requested: f64 = apps.iter().map(|app| app.resources.cpu_core).sum();
    if residual + FLOAT_DELTA >= requested {
        return Ok(apps.iter().map(|app| (app.name.clone(), app.resources.cpu_core)).collect());
    }

    if residual + FLOAT_DELTA < apps.len() as f64 * step {
        return Err(PlacementError::invariant(format!(
            "{residual} residual cores cannot give {} applications {step} cores each",
            apps.len()
        )));
    }

    let mut residual = residual;
    let mut granted: BTreeMap<&str, f64> = BTreeMap::new();
    let mut rest: Vec<&Application> = apps.to_vec();

    loop {
        let total_weight: f64 = rest.iter().map(|app| app.weight()).sum();
        let count = rest.len();
        let running = residual;
        let (floored, kept): (Vec<&Application>, Vec<&Application>) = rest
            .into_iter()
            .partition(|app| share_of(running, app.weight(), total_weight, count) <= step);
        rest = kept;
        if floored.is_empty() {
            break;
        }
        for app in floored {
            granted.insert(app.name.as_str(), step);
            residual -= step;
        }
    }

    let mut total_weight: f64 = rest.iter().map(|app| app.weight()).sum();
    let mut count = rest.len();
    for app in rest {
        let share = share_of(residual, app.weight(), total_weight, count);
        let cpu = snap_to_step(share, step).min(app.resources.cpu_core);
        granted.insert(app.name.as_str(), cpu);
        residual -= cpu;
        total_weight -= app.weight();
        count -= 1;
    }

    redistribute(&mut granted, &mut residual, apps, step);

    Ok(apps
        .iter()
        .map(|app| (app.name.clone(), granted.get(app.name.as_str()).copied().unwrap_or_default()))
        .collect())
}

/// Hand leftover cores to apps still below their request, by weight, until
/// no app can take another step.
fn redistribute<'a>(granted: &mut BTreeMap<&'a str, f64>, residual: &mut f64, apps: &[&'a Application], step: f64) {
    loop {
        let open: Vec<&'a Application> = apps
            .iter()
            .copied()
            .filter(|app| headroom(granted, app) > FLOAT_DELTA)
            .collect();
        if open.is_empty() || *residual + FLOAT_DELTA < step {
            return;
        }

        let total_weight: f64 = open.iter().map(|app| app.weight()).sum();
        let pool = *residual;
        let mut progressed = false;
        for &app in &open {
            let share = snap_to_step(share_of(pool, app.weight(), total_weight, open.len()), step);
            let extra = share.min(headroom(granted, app)).min(*residual);
            if extra > FLOAT_DELTA {
                *granted.entry(app.name.as_str()).or_default() += extra;
                *residual -= extra;
                progressed = true;
            }
        }

        if !progressed {
            // Every share is below one step: the heaviest open app takes one.
            let Some(app) = open
                .iter()
                .copied()
                .reduce(|best, app| if app.weight() > best.weight() { app } else { best })
            else {
                return;
            };
            let extra = step.min(headroom(granted, app)).min(*residual);
            if extra <= FLOAT_DELTA {
                return;
            }
            *granted.entry(app.name.as_str()).or_default() += extra;
            *residual -= extra;
        }
    }
}

fn headroom(granted: &BTreeMap<&str, f64>, app: &Application) -> f64 {
    app.resources.cpu_core - granted.get(app.name.as_str()).copied().unwrap_or_default()
}

/// One step each while it lasts, then random whole cores in random order.
pub fn random_cpu_allocation(residual: f64, apps: &[&Application], step: f64, rng: &mut SchedRng) -> Vec<(String, f64)> {
    let mut residual = residual;
    let mut cpus = vec![0.0; apps.len()];

    for cpu in cpus.iter_mut() {
        if residual + FLOAT_DELTA >= step {
            *cpu = step;
            residual -= step;
        }
    }

    let mut picks: Vec<usize> = (0..apps.len()).collect();
    picks.shuffle(rng);
    for i in picks {
        if residual <= FLOAT_DELTA {
            break;
        }
        let headroom = apps[i].resources.cpu_core - cpus[i];
        let cap = (residual.min(headroom) + FLOAT_DELTA).floor();
        if cap < 1.0 {
            continue;
        }
        let extra = f64::from(rng.gen_range(1..=cap as u32));
        cpus[i] += extra;
        residual -= extra;
    }

    apps.iter()
        .zip(cpus)
        .map(|(app, cpu)| (app.name.clone(), snap_to_step(cpu, step).min(app.resources.cpu_core)))
        .collect()
}
