//! Cloud snapshots: what the placement core sees of the world.
//!
//! Each cloud is inspected by its own tokio task. A task lists the cloud's
//! VMs, keeps the ones this scheduler created, matches each to a schedulable
//! Kubernetes node by its first address and subtracts the requests of the
//! pods already running there. Results are merged under a mutex; the RTT
//! rows come from the state store.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use mcs_core::KUBERNETES_NAMESPACE;
use mcs_placement::{Cloud, GenericResources, K8sNode, available_of_vm};
use mcs_state::StateStore;

use crate::error::SchedulerResult;
use crate::infra::{CloudProvider, Infra, InfraError, InfraResult, KubeCluster, NodeInfo};

/// Snapshot every cloud concurrently; any failing cloud fails the snapshot.
pub async fn build_snapshot(infra: &Infra, store: &StateStore) -> SchedulerResult<Vec<Cloud>> {
    let nodes = Arc::new(infra.kube.list_nodes().await?);
    let merged: Arc<Mutex<BTreeMap<String, Cloud>>> = Arc::new(Mutex::new(BTreeMap::new()));

    let mut handles = Vec::with_capacity(infra.clouds.len());
    for provider in &infra.clouds {
        let provider = Arc::clone(provider);
        let kube = Arc::clone(&infra.kube);
        let nodes = Arc::clone(&nodes);
        let merged = Arc::clone(&merged);
        let name = provider.name().to_string();
        let handle = tokio::spawn(async move {
            let cloud = snapshot_cloud(provider.as_ref(), kube.as_ref(), &nodes).await?;
            merged.lock().await.insert(cloud.name.clone(), cloud);
            Ok::<(), InfraError>(())
        });
        handles.push((name, handle));
    }

    for (name, handle) in handles {
        handle.await.map_err(|e| InfraError::Cloud {
            cloud: name,
            message: format!("snapshot task failed: {e}"),
        })??;
    }

    let mut clouds = std::mem::take(&mut *merged.lock().await);
    for cloud in clouds.values_mut() {
        if let Some(row) = store.get_net_state(&cloud.name)? {
            cloud.net_state = row.peers;
        }
    }
    Ok(clouds.into_values().collect())
}

/// One cloud's capacity and its usable nodes, in VM listing order.
pub async fn snapshot_cloud(
    provider: &dyn CloudProvider,
    kube: &dyn KubeCluster,
    nodes: &[NodeInfo],
) -> InfraResult<Cloud> {
    let resources = provider.check_resources().await?;
    let mut cloud = Cloud::new(provider.name(), provider.cloud_type(), resources.limit, resources.in_use);

    for vm in provider.list_vms().await? {
        if !provider.is_created_by_mcs(&vm.id).await? {
            continue;
        }
        let Some(ip) = vm.first_ip() else {
            debug!(cloud = %cloud.name, vm = %vm.name, "VM has no address, skipped");
            continue;
        };
        let Some(node) = nodes.iter().find(|n| n.internal_ip == ip) else {
            debug!(cloud = %cloud.name, vm = %vm.name, %ip, "VM is not a Kubernetes node, skipped");
            continue;
        };
        if !node.accepts_pods() {
            debug!(cloud = %cloud.name, node = %node.name, "node is tainted or cordoned, skipped");
            continue;
        }

        let occupied = kube
            .list_pods_on_node(KUBERNETES_NAMESPACE, &node.name)
            .await?
            .iter()
            .fold(GenericResources::default(), |acc, pod| acc + pod.requests);
        cloud.k8s_nodes.push(K8sNode {
            name: node.name.clone(),
            residual: (available_of_vm(vm.size) - occupied).clamp_non_negative(),
        });
    }

    info!(
        cloud = %cloud.name,
        cloud_type = %cloud.cloud_type,
        nodes = cloud.k8s_nodes.len(),
        remain_pct = cloud.resources.least_remain_pct(),
        "cloud snapshot taken"
    );
    Ok(cloud)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::PodInfo;
    use crate::memory::tests::make_res;
    use crate::memory::{StaticCloud, StaticCluster};
    use mcs_core::{CloudType, NetworkState};
    use mcs_placement::VmToCreate;
    use mcs_state::NetStateRecord;

    fn make_vm(name: &str, cloud: &str, cpu: f64) -> VmToCreate {
        VmToCreate {
            name: name.to_string(),
            cloud: cloud.to_string(),
            size: GenericResources::new(cpu, 4096.0, 40.0),
        }
    }

    #[tokio::test]
    async fn maps_own_vms_to_nodes() {
        let nokia = Arc::new(StaticCloud::new(
            "NOKIA4",
            CloudType::Proxmox,
            make_res(56.0, 128_000.0, 1400.0),
            make_res(26.0, 59_392.0, 629.0),
            4,
        ));
        let cluster = Arc::new(StaticCluster::new());

        let ours = nokia.create_vm(&make_vm("auto-sched-nokia4-0", "NOKIA4", 4.0)).await.unwrap();
        cluster.join_node(&ours).await.unwrap();
        cluster
            .add_pod(
                &ours.name,
                PodInfo {
                    name: "web".into(),
                    namespace: "default".into(),
                    requests: GenericResources::new(1.0, 1000.0, 10.0),
                },
            )
            .await
            .unwrap();
        // A pod outside the scheduler's namespace does not count.
        cluster
            .add_pod(
                &ours.name,
                PodInfo {
                    name: "proxy".into(),
                    namespace: "kube-system".into(),
                    requests: GenericResources::new(0.5, 100.0, 0.0),
                },
            )
            .await
            .unwrap();

        // Joined but hand-made: invisible to the scheduler.
        let foreign = nokia
            .add_foreign_vm("worker-1", "10.4.50.1", GenericResources::new(4.0, 4096.0, 40.0))
            .await;
        cluster.join_node(&foreign).await.unwrap();

        // Ours but tainted.
        let probe = nokia.create_vm(&make_vm("auto-sched-nokia4-1", "NOKIA4", 2.0)).await.unwrap();
        cluster
            .add_node(NodeInfo {
                name: probe.name.clone(),
                internal_ip: probe.ips[0].clone(),
                tainted: true,
                unschedulable: false,
            })
            .await;

        let nodes = cluster.list_nodes().await.unwrap();
        let cloud = snapshot_cloud(nokia.as_ref(), cluster.as_ref(), &nodes).await.unwrap();

        assert_eq!(cloud.k8s_nodes.len(), 1);
        let node = &cloud.k8s_nodes[0];
        assert_eq!(node.name, "auto-sched-nokia4-0");
        let expected = available_of_vm(ours.size) - GenericResources::new(1.0, 1000.0, 10.0);
        assert_eq!(node.residual, expected.clamp_non_negative());
        // Both created VMs are booked against the cloud.
        assert_eq!(cloud.resources.in_use.vcpu, 32.0);
    }

    #[tokio::test]
    async fn residual_is_clamped_at_zero() {
        let nokia = StaticCloud::new(
            "NOKIA4",
            CloudType::Proxmox,
            make_res(56.0, 128_000.0, 1400.0),
            make_res(0.0, 0.0, 0.0),
            4,
        );
        let cluster = StaticCluster::new();
        let vm = nokia.create_vm(&make_vm("auto-sched-nokia4-0", "NOKIA4", 2.0)).await.unwrap();
        cluster.join_node(&vm).await.unwrap();
        cluster
            .add_pod(
                &vm.name,
                PodInfo {
                    name: "hog".into(),
                    namespace: "default".into(),
                    requests: GenericResources::new(8.0, 100.0, 1.0),
                },
            )
            .await
            .unwrap();

        let nodes = cluster.list_nodes().await.unwrap();
        let cloud = snapshot_cloud(&nokia, &cluster, &nodes).await.unwrap();
        assert_eq!(cloud.k8s_nodes[0].residual.cpu_core, 0.0);
    }

    #[tokio::test]
    async fn snapshot_merges_clouds_and_rtt_rows() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .put_net_state(&NetStateRecord {
                source: "NOKIA4".into(),
                peers: [("CLAAUDIA".to_string(), NetworkState { rtt: 31.0 })].into_iter().collect(),
                updated_at: 1,
            })
            .unwrap();

        let infra = Infra::new(
            vec![
                Arc::new(StaticCloud::new(
                    "NOKIA4",
                    CloudType::Proxmox,
                    make_res(56.0, 128_000.0, 1400.0),
                    make_res(0.0, 0.0, 0.0),
                    4,
                )),
                Arc::new(StaticCloud::new(
                    "CLAAUDIA",
                    CloudType::Openstack,
                    make_res(-1.0, -1.0, -1.0),
                    make_res(0.0, 0.0, 0.0),
                    5,
                )),
            ],
            Arc::new(StaticCluster::new()),
        );

        let clouds = build_snapshot(&infra, &store).await.unwrap();
        let names: Vec<_> = clouds.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["CLAAUDIA", "NOKIA4"]);
        assert_eq!(clouds[1].rtt_to("CLAAUDIA"), 31.0);
        assert!(clouds[0].net_state.is_empty());
    }
}
