//! Infrastructure seams: IaaS clouds and the Kubernetes cluster.
//!
//! The controller, executor and garbage collector only talk to the outside
//! world through [`CloudProvider`] and [`KubeCluster`]. Both traits return
//! boxed `Send` futures so they stay object safe and can be shared as
//! `Arc<dyn ...>` across tokio tasks. The in-memory implementations in
//! [`crate::memory`] back the standalone daemon and the tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mcs_core::{AppInfo, CloudType, K8sApp, ResourceStatus};
use mcs_placement::{GenericResources, VmToCreate};

/// Errors reported by a cloud or the cluster.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("cloud {cloud}: {message}")]
    Cloud { cloud: String, message: String },

    #[error("kubernetes: {0}")]
    Kube(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type InfraResult<T> = Result<T, InfraError>;

/// Boxed future alias for every infrastructure call.
pub type InfraFuture<'a, T> = Pin<Box<dyn Future<Output = InfraResult<T>> + Send + 'a>>;

/// A VM as listed by its cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmInfo {
    /// Identifier assigned by the cloud.
    pub id: String,
    pub name: String,
    pub cloud: String,
    /// VMs created by the scheduler carry exactly one address.
    pub ips: Vec<String>,
    /// Total size, overhead included.
    pub size: GenericResources,
}

impl VmInfo {
    pub fn first_ip(&self) -> Option<&str> {
        self.ips.first().map(String::as_str)
    }
}

/// A Kubernetes node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub internal_ip: String,
    /// Carries a `NoSchedule` taint, e.g. a network probe node.
    pub tainted: bool,
    /// Cordoned.
    pub unschedulable: bool,
}

impl NodeInfo {
    pub fn accepts_pods(&self) -> bool {
        !self.tainted && !self.unschedulable
    }
}

/// A pod and the resources its containers request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodInfo {
    pub name: String,
    pub namespace: String,
    pub requests: GenericResources,
}

/// An IaaS cloud that can report capacity and manage VMs.
pub trait CloudProvider: Send + Sync {
    fn name(&self) -> &str;

    fn cloud_type(&self) -> CloudType;

    /// Current limits and usage of the cloud.
    fn check_resources(&self) -> InfraFuture<'_, ResourceStatus>;

    fn list_vms(&self) -> InfraFuture<'_, Vec<VmInfo>>;

    /// Create a VM of `vm.size` named `vm.name`. Returns it once it has an address.
    fn create_vm<'a>(&'a self, vm: &'a VmToCreate) -> InfraFuture<'a, VmInfo>;

    fn delete_vm<'a>(&'a self, vm_id: &'a str) -> InfraFuture<'a, ()>;

    /// Whether the VM was created by this scheduler rather than by hand.
    fn is_created_by_mcs<'a>(&'a self, vm_id: &'a str) -> InfraFuture<'a, bool>;
}

/// The Kubernetes cluster every cloud's VMs join.
pub trait KubeCluster: Send + Sync {
    /// All worker nodes; control-plane nodes are not listed.
    fn list_nodes(&self) -> InfraFuture<'_, Vec<NodeInfo>>;

    fn list_pods_on_node<'a>(&'a self, namespace: &'a str, node: &'a str) -> InfraFuture<'a, Vec<PodInfo>>;

    /// Join a freshly created VM as a worker named after the VM.
    fn join_node<'a>(&'a self, vm: &'a VmInfo) -> InfraFuture<'a, ()>;

    /// Drain and remove a node from the cluster.
    fn uninstall_node<'a>(&'a self, node: &'a str) -> InfraFuture<'a, ()>;

    /// Create the deployment and service of `app` and wait until it runs.
    fn deploy_app<'a>(&'a self, app: &'a K8sApp) -> InfraFuture<'a, AppInfo>;
}

/// Every cloud plus the cluster, shared by the controller and the collector.
#[derive(Clone)]
pub struct Infra {
    pub clouds: Vec<Arc<dyn CloudProvider>>,
    pub kube: Arc<dyn KubeCluster>,
}

impl Infra {
    pub fn new(clouds: Vec<Arc<dyn CloudProvider>>, kube: Arc<dyn KubeCluster>) -> Self {
        Self { clouds, kube }
    }

    pub fn cloud(&self, name: &str) -> Option<&Arc<dyn CloudProvider>> {
        self.clouds.iter().find(|c| c.name() == name)
    }
}
