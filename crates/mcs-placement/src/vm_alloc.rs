//! VM allocation: which app lands on which existing or new VM of its cloud.
//!
//! Works cloud by cloud over the accepted apps targeting it. Two schemes:
//!
//! - **shared**: fill the existing nodes in listing order, then at most one
//!   new VM shared by whatever is left;
//! - **dedicated**: one new VM per dependency group of max-priority apps,
//!   then the shared scheme for everybody else.
//!
//! Shared must succeed for the cloud to be usable. Dedicated is preferred
//! whenever it succeeds too.

use std::collections::BTreeMap;

use tracing::trace;

use crate::application::{Application, PriorityFilter, needed_resources};
use crate::cloud::{Cloud, K8sNode};
use crate::dependency::group_by_dep;
use crate::iterator::AppIter;
use crate::problem::Problem;
use crate::resources::{GenericResources, total_for_available};
use crate::solution::{Solution, VmToCreate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmAllocType {
    SharedVm,
    DedicatedVms,
}

/// How the shared scheme sizes its single new VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewVmPolicy {
    /// Try a bigger or smaller fraction of the limits first, then all that is left.
    Sized,
    /// Only ever take all that is left.
    AllRestOnly,
}

/// Place the apps of `iter` onto a VM with `residual` until one does not fit.
///
/// With `cpu_floor` every app occupies that many cores instead of its request.
/// Returns the placed names and whether the cursor was drained.
pub fn fit_greedy(
    mut residual: GenericResources,
    apps: &BTreeMap<String, Application>,
    iter: &mut AppIter,
    cpu_floor: Option<f64>,
) -> (Vec<String>, bool) {
    let mut placed = Vec::new();

    while let Some(name) = iter.current() {
        let Some(app) = apps.get(name) else {
            return (placed, false);
        };
        let cpu = cpu_floor.unwrap_or(app.resources.cpu_core);
        let fits = residual.cpu_core >= cpu
            && residual.memory >= app.resources.memory
            && residual.storage >= app.resources.storage;
        if !fits {
            return (placed, false);
        }
        residual -= GenericResources::new(cpu, app.resources.memory, app.resources.storage);
        placed.push(name.to_string());
        iter.advance();
    }

    (placed, true)
}

/// Production VM allocation over every cloud. `None` if any cloud cannot host its apps.
pub fn allocate_vms(problem: &Problem, raw: &Solution) -> Option<Solution> {
    allocate_with(problem, raw, |cloud| {
        allocate_vms_one_cloud(problem, cloud, raw).map(|(soln, kind)| {
            trace!(cloud = %cloud.name, ?kind, "vm allocation");
            soln
        })
    })
}

/// Comparison VM allocation: shared scheme with a single all-rest VM.
pub fn allocate_vms_cmp(problem: &Problem, raw: &Solution) -> Option<Solution> {
    allocate_with(problem, raw, |cloud| {
        shared_scheme(problem, cloud, raw, PriorityFilter::All, NewVmPolicy::AllRestOnly)
    })
}

fn allocate_with(
    problem: &Problem,
    raw: &Solution,
    mut per_cloud: impl FnMut(&Cloud) -> Option<Solution>,
) -> Option<Solution> {
    let mut with_vm = Solution {
        apps_solution: raw.apps_solution.clone(),
        vms_to_create: Vec::new(),
    };
    for cloud in problem.clouds.values() {
        with_vm.absorb(per_cloud(cloud)?);
    }
    Some(with_vm)
}

/// Shared first; dedicated replaces it when it also works.
pub fn allocate_vms_one_cloud(problem: &Problem, cloud: &Cloud, raw: &Solution) -> Option<(Solution, VmAllocType)> {
    let shared = shared_scheme(problem, cloud, raw, PriorityFilter::All, NewVmPolicy::Sized)?;
    match dedicated_scheme(problem, cloud, raw) {
        Some(dedicated) => Some((dedicated, VmAllocType::DedicatedVms)),
        None => Some((shared, VmAllocType::SharedVm)),
    }
}

/// Copy the raw decisions of `names` into a fresh partial plan.
fn partial_for(raw: &Solution, names: &[String]) -> Solution {
    let mut part = Solution::default();
    for name in names {
        if let Some(gene) = raw.get(name) {
            part.set(name, gene.clone());
        }
    }
    part
}

fn assign(part: &mut Solution, names: &[String], node: &str) {
    for name in names {
        if let Some(gene) = part.apps_solution.get_mut(name) {
            gene.k8s_node = node.to_string();
        }
    }
}

/// Existing nodes first, then at most one new shared VM.
pub fn shared_scheme(
    problem: &Problem,
    cloud: &Cloud,
    raw: &Solution,
    filter: PriorityFilter,
    new_vm: NewVmPolicy,
) -> Option<Solution> {
    let on_cloud = raw.apps_on_cloud(&cloud.name, &problem.order);
    let mut iter = AppIter::new(&problem.apps, &on_cloud, filter);
    let mut part = partial_for(raw, iter.remaining());
    if iter.is_drained() {
        return Some(part);
    }

    let floor = Some(problem.cpu_core_step());

    for node in &cloud.k8s_nodes {
        let (placed, drained) = fit_greedy(node.residual, &problem.apps, &mut iter, floor);
        assign(&mut part, &placed, &node.name);
        if drained {
            return Some(part);
        }
    }

    if !cloud.supports_create_vm() || !cloud.has_headroom() {
        return None;
    }

    if new_vm == NewVmPolicy::Sized {
        let policy = &problem.policy;
        let least = cloud.resources.least_remain_pct();
        let tier = if least > policy.bigger_vm_res_pct {
            Some(policy.bigger_vm_res_pct)
        } else if least > policy.smaller_vm_res_pct {
            Some(policy.smaller_vm_res_pct)
        } else {
            None
        };

        if let Some(pct) = tier {
            let vm = cloud.shared_vm_to_create(pct, false);
            let mut fork = iter.clone();
            let (placed, drained) = fit_greedy(K8sNode::from_vm(&vm).residual, &problem.apps, &mut fork, floor);
            if drained {
                assign(&mut part, &placed, &vm.name);
                part.vms_to_create.push(vm);
                return Some(part);
            }
        }
    }

    let vm = cloud.shared_vm_to_create(0.0, true);
    let (placed, drained) = fit_greedy(K8sNode::from_vm(&vm).residual, &problem.apps, &mut iter, floor);
    if !drained {
        return None;
    }
    assign(&mut part, &placed, &vm.name);
    part.vms_to_create.push(vm);
    Some(part)
}

/// One dedicated VM per dependency group of max-priority apps, shared scheme for the rest.
pub fn dedicated_scheme(problem: &Problem, cloud: &Cloud, raw: &Solution) -> Option<Solution> {
    if !cloud.supports_create_vm() {
        return None;
    }

    let names = raw.apps_on_cloud(&cloud.name, &problem.order);
    let mut part = partial_for(raw, &names);

    let max_pri: BTreeMap<String, Application> = AppIter::new(&problem.apps, &names, PriorityFilter::MaxPriority)
        .filter_map(|name| problem.apps.get(&name).map(|app| (name, app.clone())))
        .collect();

    let mut simulated = cloud.clone();
    for group in group_by_dep(&max_pri, &problem.order) {
        let needed = needed_resources(&problem.apps, &group, None);
        let vm = VmToCreate {
            name: simulated.name_vm_to_create(),
            cloud: cloud.name.clone(),
            size: total_for_available(needed),
        };
        simulated.simulate_create_vm(&vm, K8sNode::from_vm_with_load(&vm, needed));
        assign(&mut part, &group, &vm.name);
        part.vms_to_create.push(vm);
    }

    if simulated.resources.overflow() {
        return None;
    }

    let rest = shared_scheme(problem, &simulated, raw, PriorityFilter::NotMaxPriority, NewVmPolicy::Sized)?;
    part.absorb(rest);
    Some(part)
}
