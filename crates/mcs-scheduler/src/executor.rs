//! Plan executor: create VMs, join them, deploy the accepted apps.
//!
//! Failures are collected rather than propagated. An app whose node could
//! not be brought up is skipped, every other app is still deployed, and the
//! caller decides what a partial result means.

use std::collections::BTreeSet;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{error, info, warn};

use mcs_core::{AppInfo, K8sApp};
use mcs_placement::Solution;
use mcs_state::{AutoVmRecord, StateStore};

use crate::infra::Infra;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub deployed: Vec<AppInfo>,
    /// Names of the VMs that were created and joined.
    pub created_vms: Vec<String>,
    pub errors: Vec<String>,
}

/// Carry out `plan` for `apps`.
pub async fn execute(
    infra: &Infra,
    store: &StateStore,
    run_id: &str,
    apps: &[K8sApp],
    plan: &Solution,
) -> ExecutionReport {
    let mut report = ExecutionReport::default();
    let mut broken_nodes = BTreeSet::new();

    for vm in &plan.vms_to_create {
        let Some(provider) = infra.cloud(&vm.cloud) else {
            report.errors.push(format!("create VM {}: unknown cloud {}", vm.name, vm.cloud));
            broken_nodes.insert(vm.name.clone());
            continue;
        };

        info!(
            cloud = %vm.cloud,
            vm = %vm.name,
            cpu = vm.size.cpu_core,
            ram = vm.size.memory,
            storage = vm.size.storage,
            "creating VM"
        );
        let created = match provider.create_vm(vm).await {
            Ok(created) => created,
            Err(e) => {
                error!(cloud = %vm.cloud, vm = %vm.name, error = %e, "VM creation failed");
                report.errors.push(format!("create VM {}: {e}", vm.name));
                broken_nodes.insert(vm.name.clone());
                continue;
            }
        };

        let record = AutoVmRecord {
            name: created.name.clone(),
            cloud: created.cloud.clone(),
            vm_id: created.id.clone(),
            run_id: run_id.to_string(),
            created_at: epoch_secs(),
        };
        if let Err(e) = store.put_auto_vm(&record) {
            warn!(vm = %created.name, error = %e, "could not record auto-created VM");
            report.errors.push(format!("record VM {}: {e}", created.name));
        }

        if let Err(e) = infra.kube.join_node(&created).await {
            error!(vm = %created.name, error = %e, "joining VM to Kubernetes failed");
            report.errors.push(format!("join VM {}: {e}", created.name));
            broken_nodes.insert(created.name.clone());
            continue;
        }
        info!(vm = %created.name, ip = ?created.first_ip(), "VM joined Kubernetes");
        report.created_vms.push(created.name);
    }

    for app in with_schedule_info(apps, plan) {
        if broken_nodes.contains(&app.node_name) {
            warn!(app = %app.name, node = %app.node_name, "node unavailable, app not deployed");
            report
                .errors
                .push(format!("deploy {}: node {} is unavailable", app.name, app.node_name));
            continue;
        }
        match infra.kube.deploy_app(&app).await {
            Ok(info) => {
                info!(app = %app.name, node = %app.node_name, cpu = %app_cpu(&app), "app deployed");
                report.deployed.push(info);
            }
            Err(e) => {
                error!(app = %app.name, node = %app.node_name, error = %e, "deployment failed");
                report.errors.push(format!("deploy {}: {e}", app.name));
            }
        }
    }

    report
}

/// The accepted apps, pinned to their node with the granted CPU as request.
pub fn with_schedule_info(apps: &[K8sApp], plan: &Solution) -> Vec<K8sApp> {
    apps.iter()
        .filter_map(|app| {
            let gene = plan.get(&app.name).filter(|g| g.accepted)?;
            let mut app = app.clone();
            app.node_name = gene.k8s_node.clone();
            if let Some(container) = app.containers.first_mut() {
                container.resources.requests.cpu = format!("{:.1}", gene.allocated_cpu_core);
            }
            Some(app)
        })
        .collect()
}

fn app_cpu(app: &K8sApp) -> &str {
    app.containers
        .first()
        .map(|c| c.resources.requests.cpu.as_str())
        .unwrap_or_default()
}

/// Current Unix epoch in seconds.
pub(crate) fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
