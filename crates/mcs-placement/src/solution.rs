//! Plans: per-app decisions plus the VMs to create.
//!
//! A plan is copied (`Clone`) before any function writes to it and partial
//! results are merged back with [`Solution::absorb`]. No two workers ever
//! hold the same plan.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resources::GenericResources;

/// Decision for one application. When `accepted` is false the other fields
/// carry no meaning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SingleAppSolution {
    pub accepted: bool,
    pub target_cloud: String,
    /// Existing node or VM to create; filled by the refiner.
    pub k8s_node: String,
    /// Filled by the refiner.
    pub allocated_cpu_core: f64,
}

impl SingleAppSolution {
    pub fn rejected() -> Self {
        Self::default()
    }

    /// A raw gene: accepted onto `cloud`, node and CPU still open.
    pub fn accepted_on(cloud: &str) -> Self {
        Self {
            accepted: true,
            target_cloud: cloud.to_string(),
            k8s_node: String::new(),
            allocated_cpu_core: 0.0,
        }
    }

    /// Drop everything the refiner derives, keeping the raw decision.
    pub fn raw(&self) -> Self {
        if self.accepted {
            Self::accepted_on(&self.target_cloud)
        } else {
            Self::rejected()
        }
    }
}

/// A VM the plan asks to create. Sizes are totals including overhead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmToCreate {
    pub name: String,
    pub cloud: String,
    pub size: GenericResources,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub apps_solution: BTreeMap<String, SingleAppSolution>,
    pub vms_to_create: Vec<VmToCreate>,
}

impl Solution {
    /// Every app of `names` rejected, no VMs.
    pub fn all_rejected<'a>(names: impl IntoIterator<Item = &'a String>) -> Self {
        Self {
            apps_solution: names
                .into_iter()
                .map(|name| (name.clone(), SingleAppSolution::rejected()))
                .collect(),
            vms_to_create: Vec::new(),
        }
    }

    /// Take over `other`'s entries: app decisions overwrite, VMs append.
    pub fn absorb(&mut self, other: Solution) {
        self.apps_solution.extend(other.apps_solution);
        self.vms_to_create.extend(other.vms_to_create);
    }

    pub fn set(&mut self, app: &str, decision: SingleAppSolution) {
        self.apps_solution.insert(app.to_string(), decision);
    }

    pub fn get(&self, app: &str) -> Option<&SingleAppSolution> {
        self.apps_solution.get(app)
    }

    pub fn is_accepted(&self, app: &str) -> bool {
        self.get(app).is_some_and(|s| s.accepted)
    }

    pub fn accepted_count(&self) -> usize {
        self.apps_solution.values().filter(|s| s.accepted).count()
    }

    /// Accepted apps targeting `cloud`, walked in `order`.
    pub fn apps_on_cloud(&self, cloud: &str, order: &[String]) -> Vec<String> {
        order
            .iter()
            .filter(|name| {
                self.get(name)
                    .is_some_and(|s| s.accepted && s.target_cloud == cloud)
            })
            .cloned()
            .collect()
    }

    pub fn vms_on_cloud<'a>(&'a self, cloud: &'a str) -> impl Iterator<Item = &'a VmToCreate> + 'a {
        self.vms_to_create.iter().filter(move |vm| vm.cloud == cloud)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_plan() -> Solution {
        let mut plan = Solution::default();
        plan.set(
            "app1",
            SingleAppSolution {
                accepted: true,
                target_cloud: "NOKIA4".into(),
                k8s_node: "auto-sched-nokia4-0".into(),
                allocated_cpu_core: 1.5,
            },
        );
        plan.set("app2", SingleAppSolution::rejected());
        plan.vms_to_create.push(VmToCreate {
            name: "auto-sched-nokia4-0".into(),
            cloud: "NOKIA4".into(),
            size: GenericResources::new(4.0, 4096.0, 40.0),
        });
        plan
    }

    #[test]
    fn absorb_of_copy_is_identity() {
        let plan = make_plan();
        let mut fresh = Solution::default();
        fresh.absorb(plan.clone());
        assert_eq!(fresh, plan);
    }

    #[test]
    fn absorb_overwrites_apps_and_appends_vms() {
        let mut plan = make_plan();
        let mut other = Solution::default();
        other.set("app2", SingleAppSolution::accepted_on("CLAAUDIA"));
        other.vms_to_create.push(VmToCreate {
            name: "auto-sched-claaudia-0".into(),
            cloud: "CLAAUDIA".into(),
            size: GenericResources::new(2.0, 2048.0, 20.0),
        });

        plan.absorb(other);
        assert!(plan.is_accepted("app2"));
        assert_eq!(plan.vms_to_create.len(), 2);
        assert_eq!(plan.accepted_count(), 2);
    }

    #[test]
    fn copy_is_deep() {
        let plan = make_plan();
        let mut copy = plan.clone();
        copy.set("app1", SingleAppSolution::rejected());
        copy.vms_to_create.clear();
        assert!(plan.is_accepted("app1"));
        assert_eq!(plan.vms_to_create.len(), 1);
    }

    #[test]
    fn raw_strips_refined_fields() {
        let plan = make_plan();
        let raw = plan.get("app1").unwrap().raw();
        assert_eq!(raw, SingleAppSolution::accepted_on("NOKIA4"));
    }

    #[test]
    fn apps_on_cloud_follow_order() {
        let mut plan = Solution::default();
        plan.set("b", SingleAppSolution::accepted_on("X"));
        plan.set("a", SingleAppSolution::accepted_on("X"));
        plan.set("c", SingleAppSolution::accepted_on("Y"));
        let order: Vec<String> = ["b", "c", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(plan.apps_on_cloud("X", &order), vec!["b".to_string(), "a".to_string()]);
    }
}
