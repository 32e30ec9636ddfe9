//! mcs-placement: the multi-cloud scheduling core.
//!
//! Given a snapshot of clouds and a batch of applications, decides which
//! apps are accepted, on which cloud and VM they run, which new VMs must be
//! created and how many CPU cores each app gets. Pure and synchronous; all
//! I/O lives in `mcs-scheduler`.
//!
//! # Components
//!
//! - **`resources`**: Resource tuples and the VM overhead model
//! - **`application`** / **`cloud`** / **`solution`**: Resource model and plans
//! - **`iterator`**: Canonical-order cursors with priority filters
//! - **`dependency`**: Dependency graph, DFS grouping, topological sort
//! - **`vm_alloc`**: Shared and dedicated VM schemes
//! - **`cpu_alloc`**: Weighted and random CPU splits inside a VM
//! - **`refine`**: Raw plan → feasible plan, plus the acceptance check
//! - **`fitness`**: Plan scores for each algorithm
//! - **`genetic`**: The genetic search loop and its operators
//! - **`random`**: Random plan generators and baselines
//! - **`algorithm`**: Algorithm names and the common interface

pub mod algorithm;
pub mod application;
pub mod cloud;
pub mod cpu_alloc;
pub mod dependency;
pub mod error;
pub mod fitness;
pub mod genetic;
pub mod iterator;
pub mod problem;
pub mod random;
pub mod refine;
pub mod resources;
pub mod solution;
pub mod vm_alloc;

pub use algorithm::{AlgorithmKind, ScheduleOutcome, SchedulingAlgorithm};
pub use application::{Application, MAX_PRIORITY, MIN_PRIORITY, PriorityFilter};
pub use cloud::{Cloud, K8sNode, UNREACHABLE_RTT_MS};
pub use dependency::{check_dependencies, group_by_dep, topo_sort};
pub use error::{PlacementError, PlacementResult};
pub use fitness::{FitnessKind, FitnessModel};
pub use genetic::{GaParams, GeneticSearch};
pub use problem::Problem;
pub use refine::{Refiner, acceptable, check_plan};
pub use resources::{FLOAT_DELTA, GenericResources, available_of_vm, total_for_available};
pub use solution::{SingleAppSolution, Solution, VmToCreate};

/// The RNG every stochastic step draws from.
pub type SchedRng = rand_pcg::Pcg64;

pub fn rng_from_seed(seed: u64) -> SchedRng {
    <SchedRng as rand::SeedableRng>::seed_from_u64(seed)
}
