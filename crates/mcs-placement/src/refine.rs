//! Plan refinement: raw cloud assignment → VMs → CPUs → acceptance check.
//!
//! Every candidate the search produces goes through a [`Refiner`]; only
//! plans that come back `Some` are ever scored or returned.

use std::collections::BTreeSet;

use tracing::trace;

use crate::SchedRng;
use crate::cpu_alloc::{allocate_cpus, allocate_cpus_random, group_by_node, vm_residual};
use crate::error::PlacementResult;
use crate::problem::Problem;
use crate::resources::{FLOAT_DELTA, GenericResources};
use crate::solution::{SingleAppSolution, Solution};
use crate::vm_alloc::{allocate_vms, allocate_vms_cmp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refiner {
    /// Shared and dedicated VM schemes, weighted CPU split.
    Production,
    /// Shared scheme with only an all-rest VM, random CPU split.
    Comparison,
}

impl Refiner {
    /// Turn `raw` into a feasible plan, or `None` if the clouds cannot host it.
    ///
    /// Only the accept/cloud decisions of `raw` are read; nodes, CPUs and
    /// VMs are derived again. Apps missing from `raw` are rejected.
    pub fn refine(self, problem: &Problem, raw: &Solution, rng: &mut SchedRng) -> PlacementResult<Option<Solution>> {
        let raw = normalize(problem, raw);

        let with_vm = match self {
            Refiner::Production => allocate_vms(problem, &raw),
            Refiner::Comparison => allocate_vms_cmp(problem, &raw),
        };
        let Some(with_vm) = with_vm else {
            return Ok(None);
        };

        let with_cpu = match self {
            Refiner::Production => allocate_cpus(problem, &with_vm)?,
            Refiner::Comparison => allocate_cpus_random(problem, &with_vm, rng)?,
        };

        match check_plan(problem, &with_cpu) {
            Ok(()) => Ok(Some(with_cpu)),
            Err(reason) => {
                trace!(refiner = ?self, %reason, "refined plan not acceptable");
                Ok(None)
            }
        }
    }
}

fn normalize(problem: &Problem, raw: &Solution) -> Solution {
    let mut plan = Solution::default();
    for name in &problem.order {
        let gene = raw.get(name).map(SingleAppSolution::raw).unwrap_or_default();
        plan.set(name, gene);
    }
    plan
}

/// True if `plan` could be deployed as is.
pub fn acceptable(problem: &Problem, plan: &Solution) -> bool {
    check_plan(problem, plan).is_ok()
}

/// Check a refined plan against the snapshot. The error names the first violation.
pub fn check_plan(problem: &Problem, plan: &Solution) -> Result<(), String> {
    let step = problem.cpu_core_step();

    for (name, gene) in &plan.apps_solution {
        if !gene.accepted {
            continue;
        }
        let app = problem
            .apps
            .get(name)
            .ok_or_else(|| format!("plan accepts unknown application {name}"))?;

        if let Some(dep) = app.dependencies.iter().find(|dep| !plan.is_accepted(dep)) {
            return Err(format!("application {name} is accepted but its dependency {dep} is not"));
        }

        let cloud = problem
            .clouds
            .get(&gene.target_cloud)
            .ok_or_else(|| format!("application {name} targets unknown cloud {}", gene.target_cloud))?;
        let existing = cloud.find_node(&gene.k8s_node).is_some();
        let created = plan.vms_on_cloud(&cloud.name).any(|vm| vm.name == gene.k8s_node);
        if !existing && !created {
            return Err(format!(
                "application {name} is placed on node {:?}, which cloud {} neither has nor creates",
                gene.k8s_node, cloud.name
            ));
        }

        let cpu = gene.allocated_cpu_core;
        if cpu < step - FLOAT_DELTA || cpu > app.resources.cpu_core + FLOAT_DELTA {
            return Err(format!(
                "application {name} gets {cpu} cores, outside [{step}, {}]",
                app.resources.cpu_core
            ));
        }
    }

    let mut names = BTreeSet::new();
    for vm in &plan.vms_to_create {
        if !problem.clouds.contains_key(&vm.cloud) {
            return Err(format!("VM {} is created on unknown cloud {}", vm.name, vm.cloud));
        }
        if !names.insert(vm.name.as_str()) {
            return Err(format!("VM {} is created twice", vm.name));
        }
        if problem.clouds.values().any(|cloud| cloud.find_node(&vm.name).is_some()) {
            return Err(format!("VM {} collides with an existing node", vm.name));
        }
    }

    for cloud in problem.clouds.values() {
        let mut status = cloud.resources;
        for vm in plan.vms_on_cloud(&cloud.name) {
            status.in_use.vcpu += vm.size.cpu_core;
            status.in_use.ram += vm.size.memory;
            status.in_use.storage += vm.size.storage;
        }
        if status.overflow() {
            return Err(format!("VMs to create overflow the limits of cloud {}", cloud.name));
        }

        for (node, members) in group_by_node(plan, &cloud.name, &problem.order) {
            let residual = vm_residual(cloud, plan, &node).map_err(|e| e.to_string())?;
            let mut used = GenericResources::default();
            for member in &members {
                if let (Some(app), Some(gene)) = (problem.apps.get(member), plan.get(member)) {
                    used += GenericResources::new(gene.allocated_cpu_core, app.resources.memory, app.resources.storage);
                }
            }
            if !(residual - used).non_negative() {
                return Err(format!(
                    "applications on node {node} of cloud {} need {used:?}, only {residual:?} is left",
                    cloud.name
                ));
            }
        }
    }

    Ok(())
}
