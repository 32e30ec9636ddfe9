//! In-memory infrastructure backends.
//!
//! `StaticCloud` models an IaaS cloud from the `[[clouds]]` inventory of
//! `mcs.toml`: creating a VM books its size against the limit and hands out
//! a private address. `StaticCluster` records joined nodes, their pods and
//! every deployed application. Together they let the daemon run without
//! any real cloud and give the tests a deterministic world.

use std::collections::BTreeMap;

use tokio::sync::Mutex;
use tracing::{debug, info};

use mcs_core::config::CloudConfig;
use mcs_core::{AUTO_SCHEDULE_PREFIX, AppInfo, CloudType, K8sApp, PodHost, ResSet, ResourceStatus};
use mcs_placement::{GenericResources, VmToCreate};

use crate::infra::{CloudProvider, InfraError, InfraFuture, KubeCluster, NodeInfo, PodInfo, VmInfo};
use crate::validation::requested_resources;

// ── Cloud ──────────────────────────────────────────────────────────

struct CloudState {
    resources: ResourceStatus,
    vms: Vec<VmInfo>,
    /// Ids of the VMs this scheduler created.
    created: Vec<String>,
    next_id: u32,
}

/// A cloud whose VMs only exist in memory.
pub struct StaticCloud {
    name: String,
    cloud_type: CloudType,
    /// Second octet of the `10.x.y.z` addresses handed to new VMs.
    subnet: u8,
    state: Mutex<CloudState>,
}

impl StaticCloud {
    pub fn new(name: &str, cloud_type: CloudType, limit: ResSet, in_use: ResSet, subnet: u8) -> Self {
        Self {
            name: name.to_string(),
            cloud_type,
            subnet,
            state: Mutex::new(CloudState {
                resources: ResourceStatus { limit, in_use },
                vms: Vec::new(),
                created: Vec::new(),
                next_id: 100,
            }),
        }
    }

    pub fn from_config(config: &CloudConfig, subnet: u8) -> Self {
        Self::new(&config.name, config.cloud_type.clone(), config.limit, config.in_use, subnet)
    }

    /// Register a VM that was not created by the scheduler.
    pub async fn add_foreign_vm(&self, name: &str, ip: &str, size: GenericResources) -> VmInfo {
        let mut state = self.state.lock().await;
        let vm = VmInfo {
            id: state.next_id.to_string(),
            name: name.to_string(),
            cloud: self.name.clone(),
            ips: vec![ip.to_string()],
            size,
        };
        state.next_id += 1;
        state.vms.push(vm.clone());
        vm
    }

    fn error(&self, message: impl Into<String>) -> InfraError {
        InfraError::Cloud {
            cloud: self.name.clone(),
            message: message.into(),
        }
    }
}

/// `used + add` must stay within every limited coordinate of `limit`.
fn fits(limit: &ResSet, used: &ResSet, add: &ResSet) -> bool {
    let within = |limit: f64, used: f64, add: f64| limit < 0.0 || used + add <= limit;
    within(limit.vcpu, used.vcpu, add.vcpu)
        && within(limit.ram, used.ram, add.ram)
        && within(limit.storage, used.storage, add.storage)
        && within(limit.vm, used.vm, add.vm)
}

fn booked(size: GenericResources) -> ResSet {
    ResSet {
        vcpu: size.cpu_core,
        ram: size.memory,
        vm: 1.0,
        volume: 1.0,
        storage: size.storage,
        port: 1.0,
    }
}

fn book(used: &mut ResSet, delta: &ResSet, sign: f64) {
    used.vcpu += sign * delta.vcpu;
    used.ram += sign * delta.ram;
    used.vm += sign * delta.vm;
    used.volume += sign * delta.volume;
    used.storage += sign * delta.storage;
    used.port += sign * delta.port;
}

impl CloudProvider for StaticCloud {
    fn name(&self) -> &str {
        &self.name
    }

    fn cloud_type(&self) -> CloudType {
        self.cloud_type.clone()
    }

    fn check_resources(&self) -> InfraFuture<'_, ResourceStatus> {
        Box::pin(async move { Ok(self.state.lock().await.resources) })
    }

    fn list_vms(&self) -> InfraFuture<'_, Vec<VmInfo>> {
        Box::pin(async move { Ok(self.state.lock().await.vms.clone()) })
    }

    fn create_vm<'a>(&'a self, vm: &'a VmToCreate) -> InfraFuture<'a, VmInfo> {
        Box::pin(async move {
            if !self.cloud_type.supports_vm_creation() {
                return Err(self.error(format!("{} clouds cannot create VMs", self.cloud_type)));
            }
            let mut state = self.state.lock().await;
            if state.vms.iter().any(|existing| existing.name == vm.name) {
                return Err(self.error(format!("a VM named {} already exists", vm.name)));
            }
            let delta = booked(vm.size);
            if !fits(&state.resources.limit, &state.resources.in_use, &delta) {
                return Err(self.error(format!("not enough resources for VM {}", vm.name)));
            }

            let id = state.next_id;
            state.next_id += 1;
            let created = VmInfo {
                id: id.to_string(),
                name: vm.name.clone(),
                cloud: self.name.clone(),
                ips: vec![format!("10.{}.{}.{}", self.subnet, id / 256, id % 256)],
                size: vm.size,
            };
            book(&mut state.resources.in_use, &delta, 1.0);
            state.vms.push(created.clone());
            state.created.push(created.id.clone());
            info!(cloud = %self.name, vm = %created.name, id = %created.id, "VM created");
            Ok(created)
        })
    }

    fn delete_vm<'a>(&'a self, vm_id: &'a str) -> InfraFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let idx = state
                .vms
                .iter()
                .position(|vm| vm.id == vm_id)
                .ok_or_else(|| InfraError::NotFound(format!("VM {vm_id} on cloud {}", self.name)))?;
            let vm = state.vms.remove(idx);
            book(&mut state.resources.in_use, &booked(vm.size), -1.0);
            state.created.retain(|id| id != vm_id);
            info!(cloud = %self.name, vm = %vm.name, id = %vm.id, "VM deleted");
            Ok(())
        })
    }

    fn is_created_by_mcs<'a>(&'a self, vm_id: &'a str) -> InfraFuture<'a, bool> {
        Box::pin(async move {
            let state = self.state.lock().await;
            if !state.vms.iter().any(|vm| vm.id == vm_id) {
                return Err(InfraError::NotFound(format!("VM {vm_id} on cloud {}", self.name)));
            }
            Ok(state.created.iter().any(|id| id == vm_id))
        })
    }
}

// ── Cluster ────────────────────────────────────────────────────────

struct NodeEntry {
    info: NodeInfo,
    pods: Vec<PodInfo>,
}

/// A Kubernetes cluster kept in memory.
#[derive(Default)]
pub struct StaticCluster {
    nodes: Mutex<BTreeMap<String, NodeEntry>>,
    deployed: Mutex<Vec<K8sApp>>,
}

impl StaticCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node directly, bypassing `join_node`.
    pub async fn add_node(&self, info: NodeInfo) {
        self.nodes.lock().await.insert(
            info.name.clone(),
            NodeEntry {
                info,
                pods: Vec::new(),
            },
        );
    }

    /// Schedule a pod on `node` outside of `deploy_app`.
    pub async fn add_pod(&self, node: &str, pod: PodInfo) -> Result<(), InfraError> {
        let mut nodes = self.nodes.lock().await;
        let entry = nodes
            .get_mut(node)
            .ok_or_else(|| InfraError::NotFound(format!("node {node}")))?;
        entry.pods.push(pod);
        Ok(())
    }

    pub async fn node_names(&self) -> Vec<String> {
        self.nodes.lock().await.keys().cloned().collect()
    }

    /// Every application deployed so far, in deployment order.
    pub async fn deployed(&self) -> Vec<K8sApp> {
        self.deployed.lock().await.clone()
    }
}

impl KubeCluster for StaticCluster {
    fn list_nodes(&self) -> InfraFuture<'_, Vec<NodeInfo>> {
        Box::pin(async move { Ok(self.nodes.lock().await.values().map(|n| n.info.clone()).collect()) })
    }

    fn list_pods_on_node<'a>(&'a self, namespace: &'a str, node: &'a str) -> InfraFuture<'a, Vec<PodInfo>> {
        Box::pin(async move {
            let nodes = self.nodes.lock().await;
            let entry = nodes
                .get(node)
                .ok_or_else(|| InfraError::NotFound(format!("node {node}")))?;
            Ok(entry.pods.iter().filter(|p| p.namespace == namespace).cloned().collect())
        })
    }

    fn join_node<'a>(&'a self, vm: &'a VmInfo) -> InfraFuture<'a, ()> {
        Box::pin(async move {
            let ip = vm
                .first_ip()
                .ok_or_else(|| InfraError::Kube(format!("VM {} has no address to join with", vm.name)))?;
            let mut nodes = self.nodes.lock().await;
            if nodes.contains_key(&vm.name) {
                return Err(InfraError::Kube(format!("node {} is already in the cluster", vm.name)));
            }
            nodes.insert(
                vm.name.clone(),
                NodeEntry {
                    info: NodeInfo {
                        name: vm.name.clone(),
                        internal_ip: ip.to_string(),
                        tainted: false,
                        unschedulable: false,
                    },
                    pods: Vec::new(),
                },
            );
            debug!(node = %vm.name, %ip, "node joined");
            Ok(())
        })
    }

    fn uninstall_node<'a>(&'a self, node: &'a str) -> InfraFuture<'a, ()> {
        Box::pin(async move {
            self.nodes
                .lock()
                .await
                .remove(node)
                .map(|_| debug!(%node, "node uninstalled"))
                .ok_or_else(|| InfraError::NotFound(format!("node {node}")))
        })
    }

    fn deploy_app<'a>(&'a self, app: &'a K8sApp) -> InfraFuture<'a, AppInfo> {
        Box::pin(async move {
            let requests = requested_resources(app).map_err(InfraError::Kube)?;
            let mut nodes = self.nodes.lock().await;
            let entry = nodes
                .get_mut(&app.node_name)
                .ok_or_else(|| InfraError::Kube(format!("app {}: node {:?} does not exist", app.name, app.node_name)))?;

            entry.pods.push(PodInfo {
                name: format!("{}-deployment-0", app.name),
                namespace: mcs_core::KUBERNETES_NAMESPACE.to_string(),
                requests,
            });
            let info = app_info(app, &entry.info);
            drop(nodes);

            self.deployed.lock().await.push(app.clone());
            Ok(info)
        })
    }
}

/// What the caller sees for an application running on `node`.
fn app_info(app: &K8sApp, node: &NodeInfo) -> AppInfo {
    let ports: Vec<_> = app.containers.iter().flat_map(|c| c.ports.iter()).collect();
    AppInfo {
        app_name: app.name.clone(),
        svc_name: format!("{}-service", app.name),
        deploy_name: format!("{}-deployment", app.name),
        cluster_ip: String::new(),
        node_port_ip: vec![node.internal_ip.clone()],
        svc_port: ports.iter().map(|p| p.service_port.clone()).collect(),
        node_port: ports.iter().map(|p| p.node_port.clone()).collect(),
        container_port: ports.iter().map(|p| p.container_port.to_string()).collect(),
        hosts: vec![PodHost {
            host_ip: node.internal_ip.clone(),
            host_name: node.name.clone(),
        }],
        status: "running".to_string(),
        priority: app.priority,
        auto_scheduled: app.auto_scheduled,
    }
}

/// Whether `name` follows the auto-scheduled VM naming scheme.
pub fn is_auto_scheduled_name(name: &str) -> bool {
    name.starts_with(AUTO_SCHEDULE_PREFIX)
}
