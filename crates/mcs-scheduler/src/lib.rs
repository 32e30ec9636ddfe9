//! mcs-scheduler: the controller around the placement core.
//!
//! Turns a `doNewAppGroup` request into running applications and keeps the
//! auto-created VMs tidy afterwards. The scheduler:
//!
//! - Validates applications and their dependency graph
//! - Snapshots every cloud concurrently (capacity, own nodes, RTT rows)
//! - Runs the requested placement algorithm under a seeded RNG
//! - Creates and joins VMs, then deploys the accepted apps
//! - Persists a record of every run
//! - Sweeps idle auto-scheduled VMs and nodes
//!
//! # Architecture
//!
//! ```text
//! Scheduler (one task at a time)
//!   ├── validation (K8sApp → Application)
//!   ├── snapshot   (CloudProvider + KubeCluster → Cloud)
//!   ├── mcs-placement (Problem → ScheduleOutcome)
//!   ├── executor   (create VM → join → deploy)
//!   ├── gc         (idle prefix nodes/VMs → removed)
//!   └── StateStore (RTT rows, run records, auto VMs)
//! ```

pub mod error;
pub mod executor;
pub mod gc;
pub mod infra;
pub mod memory;
pub mod scheduler;
pub mod snapshot;
pub mod validation;

pub use error::{SchedulerError, SchedulerResult};
pub use executor::ExecutionReport;
pub use gc::GcReport;
pub use infra::{CloudProvider, Infra, InfraError, KubeCluster, NodeInfo, PodInfo, VmInfo};
pub use memory::{StaticCloud, StaticCluster};
pub use scheduler::{ScheduleRequest, Scheduler};
