//! Garbage collection of auto-scheduled VMs and Kubernetes nodes.
//!
//! A sweep lists every node and VM carrying the auto-schedule prefix. Nodes
//! still running pods in the scheduler's namespace are kept together with
//! their VM; all other such nodes are uninstalled and their VMs deleted.
//! Listing failures abort the sweep, per-entry failures are logged and
//! skipped. The caller holds the scheduling lock.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use mcs_core::KUBERNETES_NAMESPACE;
use mcs_state::StateStore;

use crate::error::SchedulerResult;
use crate::infra::{CloudProvider, Infra, VmInfo};
use crate::memory::is_auto_scheduled_name;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GcReport {
    pub kept_nodes: Vec<String>,
    pub removed_nodes: Vec<String>,
    pub deleted_vms: Vec<String>,
    pub errors: Vec<String>,
}

/// Run one sweep.
pub async fn sweep(infra: &Infra, store: &StateStore) -> SchedulerResult<GcReport> {
    info!("auto-scheduled VM cleanup started");
    let mut report = GcReport::default();

    let nodes: Vec<String> = infra
        .kube
        .list_nodes()
        .await?
        .into_iter()
        .map(|n| n.name)
        .filter(|name| is_auto_scheduled_name(name))
        .collect();

    let mut vms: Vec<(Arc<dyn CloudProvider>, VmInfo)> = Vec::new();
    for provider in &infra.clouds {
        for vm in provider.list_vms().await? {
            if is_auto_scheduled_name(&vm.name) {
                vms.push((Arc::clone(provider), vm));
            }
        }
    }

    // Names whose VM must survive this sweep.
    let mut keep = BTreeSet::new();
    for node in &nodes {
        match infra.kube.list_pods_on_node(KUBERNETES_NAMESPACE, node).await {
            Ok(pods) if !pods.is_empty() => {
                keep.insert(node.clone());
                report.kept_nodes.push(node.clone());
            }
            Ok(_) => {}
            Err(e) => {
                // Unknown load: leave the node alone.
                warn!(%node, error = %e, "listing pods failed, node kept");
                report.errors.push(format!("list pods on {node}: {e}"));
                keep.insert(node.clone());
            }
        }
    }

    for node in &nodes {
        if keep.contains(node) {
            continue;
        }
        match infra.kube.uninstall_node(node).await {
            Ok(()) => {
                info!(%node, "idle node uninstalled");
                report.removed_nodes.push(node.clone());
            }
            Err(e) => {
                error!(%node, error = %e, "uninstalling node failed, its VM is kept");
                report.errors.push(format!("uninstall node {node}: {e}"));
                keep.insert(node.clone());
            }
        }
    }

    for (provider, vm) in vms.iter().filter(|(_, vm)| !keep.contains(&vm.name)) {
        if let Err(e) = provider.delete_vm(&vm.id).await {
            error!(cloud = %provider.name(), vm = %vm.name, error = %e, "deleting VM failed");
            report.errors.push(format!("delete VM {}: {e}", vm.name));
            continue;
        }
        info!(cloud = %provider.name(), vm = %vm.name, "idle VM deleted");
        report.deleted_vms.push(vm.name.clone());
        if let Err(e) = store.delete_auto_vm(&vm.name) {
            warn!(vm = %vm.name, error = %e, "could not forget deleted VM");
            report.errors.push(format!("forget VM {}: {e}", vm.name));
        }
    }

    info!(
        kept = report.kept_nodes.len(),
        removed_nodes = report.removed_nodes.len(),
        deleted_vms = report.deleted_vms.len(),
        errors = report.errors.len(),
        "auto-scheduled VM cleanup finished"
    );
    Ok(report)
}
