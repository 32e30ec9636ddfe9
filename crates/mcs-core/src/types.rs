//! Shared types used across the scheduler crates.
//!
//! Two groups live here: the request/response shapes of the HTTP interface
//! (`K8sApp`, `AppInfo`, ...) and the infrastructure-level resource
//! accounting (`ResSet`, `ResourceStatus`, `CloudType`) that both the
//! placement core and the cloud backends speak.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Name prefix of every VM and Kubernetes node created by the scheduler.
pub const AUTO_SCHEDULE_PREFIX: &str = "auto-sched-";

/// Namespace the scheduler deploys applications into.
pub const KUBERNETES_NAMESPACE: &str = "default";

/// Header selecting the scheduling algorithm.
pub const ALGORITHM_HEADER: &str = "Mcm-Scheduling-Algorithm";

/// Header carrying the expected computation time of one app on one core (ms).
pub const EXPECTED_TIME_HEADER: &str = "Expected-Time-One-Cpu";

/// Unit suffix required on memory quantities.
pub const MEM_UNIT_SUFFIX: &str = "Mi";

/// Unit suffix required on storage quantities.
pub const STORAGE_UNIT_SUFFIX: &str = "Gi";

/// Pattern a CPU quantity must match (whole or fractional cores, no `m`).
pub const CPU_RES_REGEX: &str = r"^[0-9]+(\.[0-9]+)?$";

// ── Resource accounting ────────────────────────────────────────

/// A set of cloud-level resource amounts. Negative values mean unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResSet {
    /// Logical CPU cores.
    #[serde(default)]
    pub vcpu: f64,
    /// Memory in MiB.
    #[serde(default)]
    pub ram: f64,
    /// Number of VMs.
    #[serde(default = "unlimited")]
    pub vm: f64,
    /// Number of volumes.
    #[serde(default = "unlimited")]
    pub volume: f64,
    /// Storage in GiB.
    #[serde(default)]
    pub storage: f64,
    /// Number of network ports.
    #[serde(default = "unlimited")]
    pub port: f64,
}

fn unlimited() -> f64 {
    -1.0
}

impl ResSet {
    /// True if every limited coordinate of `self` is strictly above `other`.
    ///
    /// Coordinates of `self` that are negative (unlimited) always pass.
    pub fn all_more_than(&self, other: &ResSet) -> bool {
        let pairs = [
            (self.vcpu, other.vcpu),
            (self.ram, other.ram),
            (self.vm, other.vm),
            (self.volume, other.volume),
            (self.storage, other.storage),
            (self.port, other.port),
        ];
        pairs.iter().all(|&(mine, theirs)| mine < 0.0 || mine > theirs)
    }

    /// Whether cpu, memory and storage all carry a finite limit.
    pub fn compute_limited(&self) -> bool {
        self.vcpu >= 0.0 && self.ram >= 0.0 && self.storage >= 0.0
    }
}

/// Total and used resources of one cloud.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub limit: ResSet,
    pub in_use: ResSet,
}

impl ResourceStatus {
    /// Remaining fraction of the scarcest of cpu, memory and storage.
    ///
    /// Starts from 1.0; unlimited coordinates are ignored.
    pub fn least_remain_pct(&self) -> f64 {
        let pairs = [
            (self.limit.vcpu, self.in_use.vcpu),
            (self.limit.ram, self.in_use.ram),
            (self.limit.storage, self.in_use.storage),
        ];
        pairs
            .iter()
            .filter(|(limit, _)| *limit > 0.0)
            .map(|(limit, used)| (limit - used) / limit)
            .fold(1.0, f64::min)
    }

    /// True if cpu, memory or storage is used beyond its limit.
    pub fn overflow(&self) -> bool {
        let over = |limit: f64, used: f64| limit >= 0.0 && used > limit;
        over(self.limit.vcpu, self.in_use.vcpu)
            || over(self.limit.ram, self.in_use.ram)
            || over(self.limit.storage, self.in_use.storage)
    }
}

/// The IaaS flavor behind a cloud. Only Proxmox clouds let us create VMs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudType {
    Proxmox,
    Openstack,
    #[serde(other)]
    Other,
}

impl CloudType {
    pub fn supports_vm_creation(&self) -> bool {
        matches!(self, CloudType::Proxmox)
    }
}

impl std::fmt::Display for CloudType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CloudType::Proxmox => "proxmox",
            CloudType::Openstack => "openstack",
            CloudType::Other => "other",
        };
        f.write_str(s)
    }
}

/// Measured network state from one cloud towards a peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    /// Round-trip time in milliseconds.
    pub rtt: f64,
}

// ── Application request ────────────────────────────────────────

/// An application submitted for automatic scheduling.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sApp {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub host_network: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub node_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub containers: Vec<K8sContainer>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub auto_scheduled: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dependencies: Vec<Dependency>,
}

/// A directed dependency edge: this app depends on `app_name`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub app_name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sContainer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub work_dir: String,
    #[serde(default)]
    pub resources: K8sResReq,
    #[serde(default, deserialize_with = "null_as_default")]
    pub commands: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub args: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub env: Vec<K8sEnv>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub mounts: Vec<K8sMount>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub ports: Vec<PortInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct K8sResReq {
    #[serde(default)]
    pub limits: K8sResList,
    #[serde(default)]
    pub requests: K8sResList,
}

/// Resource quantities as Kubernetes-style strings (`"1.5"`, `"512Mi"`, `"20Gi"`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct K8sResList {
    #[serde(default)]
    pub memory: String,
    #[serde(default)]
    pub cpu: String,
    #[serde(default)]
    pub storage: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct K8sEnv {
    pub name: String,
    pub value: String,
}

/// A VM path mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sMount {
    pub vm_path: String,
    pub container_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    pub container_port: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub service_port: String,
    #[serde(default)]
    pub node_port: String,
}

/// Accept `null` wherever a list is expected; clients send both.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ── Deployment result ──────────────────────────────────────────

/// What the caller gets back for every deployed application.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub app_name: String,
    pub svc_name: String,
    pub deploy_name: String,
    #[serde(rename = "clusterIP")]
    pub cluster_ip: String,
    #[serde(rename = "nodePortIP")]
    pub node_port_ip: Vec<String>,
    pub svc_port: Vec<String>,
    pub node_port: Vec<String>,
    pub container_port: Vec<String>,
    pub hosts: Vec<PodHost>,
    pub status: String,
    pub priority: i32,
    pub auto_scheduled: bool,
}

/// Where one pod of an application runs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodHost {
    #[serde(rename = "hostIP")]
    pub host_ip: String,
    pub host_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_res(vcpu: f64, ram: f64, storage: f64) -> ResSet {
        ResSet {
            vcpu,
            ram,
            vm: -1.0,
            volume: -1.0,
            storage,
            port: -1.0,
        }
    }

    #[test]
    fn all_more_than_skips_unlimited() {
        let limit = make_res(56.0, 128796.75, 1396.52);
        let used = make_res(26.0, 59392.0, 629.0);
        assert!(limit.all_more_than(&used));

        let exhausted = make_res(56.0, 59392.0, 629.0);
        assert!(!limit.all_more_than(&exhausted));

        let unlimited = make_res(-1.0, -1.0, -1.0);
        assert!(unlimited.all_more_than(&exhausted));
    }

    #[test]
    fn least_remain_pct_picks_scarcest() {
        let status = ResourceStatus {
            limit: make_res(56.0, 128796.75, 1396.52),
            in_use: make_res(26.0, 59392.0, 629.0),
        };
        let pct = status.least_remain_pct();
        // CPU: 30/56 = 0.5357, RAM: 0.5389, storage: 0.5496
        assert!((pct - 30.0 / 56.0).abs() < 1e-9);
    }

    #[test]
    fn overflow_is_strict() {
        let mut status = ResourceStatus {
            limit: make_res(10.0, 100.0, 50.0),
            in_use: make_res(10.0, 100.0, 50.0),
        };
        assert!(!status.overflow());
        status.in_use.ram = 100.5;
        assert!(status.overflow());
    }

    #[test]
    fn cloud_type_parses_unknown_as_other() {
        let t: CloudType = serde_json::from_str("\"proxmox\"").unwrap();
        assert!(t.supports_vm_creation());
        let t: CloudType = serde_json::from_str("\"openstack\"").unwrap();
        assert!(!t.supports_vm_creation());
        let t: CloudType = serde_json::from_str("\"proxmox (powered off)\"").unwrap();
        assert_eq!(t, CloudType::Other);
    }

    #[test]
    fn k8s_app_parses_camel_case() {
        let json = r#"{
            "name": "group-nginx", "priority": 4, "autoScheduled": true,
            "replicas": 1, "hostNetwork": true,
            "containers": [{
                "name": "nginx", "image": "nginx:1.17.1", "workDir": "",
                "resources": {
                    "limits": {"memory": "1024Mi", "cpu": "2.1", "storage": "20Gi"},
                    "requests": {"memory": "1024Mi", "cpu": "2.1", "storage": "20Gi"}
                },
                "args": null,
                "ports": [{"containerPort": 80, "name": "fsd", "protocol": "tcp",
                           "servicePort": "80", "nodePort": "30001"}]
            }],
            "dependencies": [{"appName": "group-ubuntu"}]
        }"#;
        let app: K8sApp = serde_json::from_str(json).unwrap();
        assert_eq!(app.name, "group-nginx");
        assert!(app.auto_scheduled);
        assert_eq!(app.containers[0].resources.requests.cpu, "2.1");
        assert_eq!(app.dependencies[0].app_name, "group-ubuntu");
        assert!(app.node_name.is_empty());
        assert!(app.containers[0].args.is_empty());
    }
}
