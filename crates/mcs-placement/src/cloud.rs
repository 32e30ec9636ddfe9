//! Cloud snapshots: capacity, existing Kubernetes nodes, RTT row.

use std::collections::{BTreeMap, BTreeSet};

use mcs_core::{AUTO_SCHEDULE_PREFIX, CloudType, NetworkState, ResSet, ResourceStatus};
use serde::{Deserialize, Serialize};

use crate::resources::{GenericResources, available_of_vm};
use crate::solution::VmToCreate;

/// RTT reported for a peer with no measurement. Above any sane `max_acc_rtt_ms`.
pub const UNREACHABLE_RTT_MS: f64 = 100_000.0;

/// A VM already joined to Kubernetes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct K8sNode {
    pub name: String,
    /// Available resources of the VM minus the requests of its pods, clamped at 0.
    pub residual: GenericResources,
}

impl K8sNode {
    /// An empty node on a VM of the given total size.
    pub fn from_vm(vm: &VmToCreate) -> Self {
        Self {
            name: vm.name.clone(),
            residual: available_of_vm(vm.size),
        }
    }

    /// A node on `vm` already hosting apps that request `occupied` in total.
    pub fn from_vm_with_load(vm: &VmToCreate, occupied: GenericResources) -> Self {
        Self {
            name: vm.name.clone(),
            residual: (available_of_vm(vm.size) - occupied).clamp_non_negative(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cloud {
    pub name: String,
    pub cloud_type: CloudType,
    pub resources: ResourceStatus,
    /// Peer cloud name → measured state.
    pub net_state: BTreeMap<String, NetworkState>,
    /// Existing nodes, in listing order.
    pub k8s_nodes: Vec<K8sNode>,
}

impl Cloud {
    pub fn new(name: &str, cloud_type: CloudType, limit: ResSet, in_use: ResSet) -> Self {
        Self {
            name: name.to_string(),
            cloud_type,
            resources: ResourceStatus { limit, in_use },
            net_state: BTreeMap::new(),
            k8s_nodes: Vec::new(),
        }
    }

    /// Only clouds of a creatable type with finite cpu, memory and storage
    /// limits get new VMs.
    pub fn supports_create_vm(&self) -> bool {
        self.cloud_type.supports_vm_creation() && self.resources.limit.compute_limited()
    }

    /// Room left for at least one more VM.
    pub fn has_headroom(&self) -> bool {
        self.resources.limit.all_more_than(&self.resources.in_use)
    }

    pub fn vm_name_prefix(&self) -> String {
        format!("{AUTO_SCHEDULE_PREFIX}{}-", self.name.to_lowercase())
    }

    /// `auto-sched-<cloud>-<i>` with the smallest `i` no existing node uses.
    pub fn name_vm_to_create(&self) -> String {
        let prefix = self.vm_name_prefix();
        let used: BTreeSet<u64> = self
            .k8s_nodes
            .iter()
            .filter_map(|node| node.name.strip_prefix(&prefix))
            .filter_map(|suffix| suffix.parse().ok())
            .collect();
        let free = (0..).find(|i| !used.contains(i)).unwrap_or_default();
        format!("{prefix}{free}")
    }

    /// A shared VM taking `pct` of each limit, or everything left with `all_rest`.
    ///
    /// Each component is floored and never exceeds what is left.
    pub fn shared_vm_to_create(&self, pct: f64, all_rest: bool) -> VmToCreate {
        let ResourceStatus { limit, in_use } = self.resources;
        let size_of = |limit: f64, used: f64| {
            let rest = (limit - used).floor();
            if all_rest {
                rest
            } else {
                (limit * pct).floor().min(rest)
            }
        };
        VmToCreate {
            name: self.name_vm_to_create(),
            cloud: self.name.clone(),
            size: GenericResources::new(
                size_of(limit.vcpu, in_use.vcpu),
                size_of(limit.ram, in_use.ram),
                size_of(limit.storage, in_use.storage),
            ),
        }
    }

    /// Book `vm` against this snapshot: grow InUse and add its node.
    pub fn simulate_create_vm(&mut self, vm: &VmToCreate, node: K8sNode) {
        self.resources.in_use.vcpu += vm.size.cpu_core;
        self.resources.in_use.ram += vm.size.memory;
        self.resources.in_use.storage += vm.size.storage;
        self.k8s_nodes.push(node);
    }

    /// RTT from this cloud to `peer`.
    pub fn rtt_to(&self, peer: &str) -> f64 {
        match self.net_state.get(peer) {
            Some(state) => state.rtt,
            None if peer == self.name => 0.0,
            None => UNREACHABLE_RTT_MS,
        }
    }

    pub fn find_node(&self, name: &str) -> Option<&K8sNode> {
        self.k8s_nodes.iter().find(|node| node.name == name)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn make_res(vcpu: f64, ram: f64, storage: f64) -> ResSet {
        ResSet {
            vcpu,
            ram,
            vm: -1.0,
            volume: -1.0,
            storage,
            port: -1.0,
        }
    }

    fn make_node(name: &str) -> K8sNode {
        K8sNode {
            name: name.to_string(),
            residual: GenericResources::default(),
        }
    }

    fn nokia4_with(nodes: &[&str]) -> Cloud {
        let mut cloud = Cloud::new(
            "NOKIA4",
            CloudType::Proxmox,
            make_res(56.0, 128796.75, 1396.52),
            make_res(26.0, 59392.0, 629.0),
        );
        cloud.k8s_nodes = nodes.iter().map(|n| make_node(n)).collect();
        cloud
    }

    #[test]
    fn vm_name_fills_first_gap() {
        let cloud = nokia4_with(&["auto-sched-nokia4-0", "auto-sched-nokia4-2", "auto-sched-nokia4-4"]);
        assert_eq!(cloud.name_vm_to_create(), "auto-sched-nokia4-1");
    }

    #[test]
    fn vm_name_on_empty_cloud_is_zero() {
        assert_eq!(nokia4_with(&[]).name_vm_to_create(), "auto-sched-nokia4-0");
    }

    #[test]
    fn vm_name_after_contiguous_run() {
        let cloud = nokia4_with(&[
            "auto-sched-nokia4-0",
            "auto-sched-nokia4-1",
            "auto-sched-nokia4-2",
            "auto-sched-nokia4-3",
            "auto-sched-nokia4-4",
        ]);
        assert_eq!(cloud.name_vm_to_create(), "auto-sched-nokia4-5");
    }

    #[test]
    fn vm_name_ignores_foreign_nodes() {
        let cloud = nokia4_with(&["nokia4-master", "auto-sched-claaudia-0", "auto-sched-nokia4-x"]);
        assert_eq!(cloud.name_vm_to_create(), "auto-sched-nokia4-0");
    }

    #[test]
    fn shared_vm_sizes() {
        let cloud = nokia4_with(&[]);
        assert!((cloud.resources.least_remain_pct() - 30.0 / 56.0).abs() < 1e-9);

        let vm = cloud.shared_vm_to_create(0.33, false);
        assert_eq!(vm.size, GenericResources::new(18.0, 42502.0, 460.0));

        let vm = cloud.shared_vm_to_create(0.5, false);
        assert_eq!(vm.size, GenericResources::new(28.0, 64398.0, 698.0));

        let vm = cloud.shared_vm_to_create(0.0, true);
        assert_eq!(vm.size, GenericResources::new(30.0, 69404.0, 767.0));
        assert_eq!(vm.cloud, "NOKIA4");
    }

    #[test]
    fn sized_vm_is_capped_by_what_is_left() {
        let mut cloud = nokia4_with(&[]);
        cloud.resources.in_use = make_res(50.0, 59392.0, 629.0);
        let vm = cloud.shared_vm_to_create(0.5, false);
        assert_eq!(vm.size.cpu_core, 6.0);
    }

    #[test]
    fn simulate_create_books_capacity() {
        let mut cloud = nokia4_with(&[]);
        let vm = cloud.shared_vm_to_create(0.0, true);
        let node = K8sNode::from_vm(&vm);
        cloud.simulate_create_vm(&vm, node);
        assert_eq!(cloud.k8s_nodes.len(), 1);
        assert!(!cloud.has_headroom());
        assert!(!cloud.resources.overflow());
        assert_eq!(cloud.name_vm_to_create(), "auto-sched-nokia4-1");
    }

    #[test]
    fn only_limited_proxmox_creates_vms() {
        let mut cloud = nokia4_with(&[]);
        assert!(cloud.supports_create_vm());
        cloud.resources.limit.ram = -1.0;
        assert!(!cloud.supports_create_vm());

        let openstack = Cloud::new("CLAAUDIA", CloudType::Openstack, make_res(10.0, 10.0, 10.0), ResSet::default());
        assert!(!openstack.supports_create_vm());
    }

    #[test]
    fn missing_peer_is_unreachable() {
        let mut cloud = nokia4_with(&[]);
        cloud.net_state.insert("CLAAUDIA".into(), NetworkState { rtt: 32.1 });
        assert_eq!(cloud.rtt_to("CLAAUDIA"), 32.1);
        assert_eq!(cloud.rtt_to("NOKIA4"), 0.0);
        assert_eq!(cloud.rtt_to("HPE1"), UNREACHABLE_RTT_MS);
    }
}
