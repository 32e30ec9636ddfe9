//! Domain types for the scheduler state store.
//!
//! The RTT matrix measured between clouds, a record of every scheduling
//! run, and the VMs the scheduler created on its own. All types are
//! serializable to/from JSON for storage in redb tables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use mcs_core::NetworkState;

// ── Network state ──────────────────────────────────────────────────

/// One row of the RTT matrix: measurements from `source` to every peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetStateRecord {
    /// Name of the cloud the measurements were taken from.
    pub source: String,
    /// Peer cloud name → measured state.
    pub peers: BTreeMap<String, NetworkState>,
    /// Unix timestamp (seconds) of the last update.
    pub updated_at: u64,
}

impl NetStateRecord {
    pub fn table_key(&self) -> String {
        self.source.clone()
    }
}

// ── Scheduling runs ────────────────────────────────────────────────

/// Outcome of one `doNewAppGroup` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub id: String,
    pub algorithm: String,
    pub seed: u64,
    pub expected_time_one_cpu: f64,
    pub app_count: usize,
    pub accepted_count: usize,
    pub placements: Vec<RunPlacement>,
    /// Names of the VMs the plan asked for.
    pub vms_to_create: Vec<String>,
    pub final_fitness: Option<f64>,
    /// Best fitness of every GA iteration; empty for one-shot algorithms.
    pub best_fitness_each_iter: Vec<f64>,
    pub status: RunStatus,
    /// Unix timestamps (milliseconds).
    pub started_at: u64,
    pub finished_at: u64,
}

impl RunRecord {
    pub fn table_key(&self) -> String {
        self.id.clone()
    }
}

/// Where one application of a run ended up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunPlacement {
    pub app: String,
    pub accepted: bool,
    pub cloud: Option<String>,
    pub node: Option<String>,
    pub cpu: Option<f64>,
    /// Expected running time on the granted cores, when the request gave a
    /// one-core time.
    #[serde(default)]
    pub estimated_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Planned,
    Deployed,
    PartiallyDeployed { errors: Vec<String> },
    Unusable,
    Failed { error: String },
}

// ── Auto-created VMs ───────────────────────────────────────────────

/// A VM the executor created for a plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutoVmRecord {
    pub name: String,
    pub cloud: String,
    pub vm_id: String,
    pub run_id: String,
    /// Unix timestamp (seconds).
    pub created_at: u64,
}

impl AutoVmRecord {
    pub fn table_key(&self) -> String {
        self.name.clone()
    }
}
