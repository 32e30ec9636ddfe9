//! Fitness functions: scalar scores of refined plans, higher is better.

use crate::problem::Problem;
use crate::solution::Solution;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitnessKind {
    /// RTT between dependent apps and CPU satisfaction, weighted by priority.
    Mcssga,
    /// Number of accepted apps.
    Amaga,
    /// Sum of the priorities of accepted apps.
    Ampga,
    /// Short RTT towards dependencies, rejection penalized.
    Diktyo,
}

/// A fitness function bound to the constants of one problem.
#[derive(Debug, Clone, Copy)]
pub struct FitnessModel {
    pub kind: FitnessKind,
    pub max_reachable_rtt: f64,
    pub avg_dep_num: f64,
}

impl FitnessModel {
    pub fn new(kind: FitnessKind, problem: &Problem) -> Self {
        Self {
            kind,
            max_reachable_rtt: max_reachable_rtt(problem),
            avg_dep_num: avg_dep_num(problem),
        }
    }

    pub fn evaluate(&self, problem: &Problem, plan: &Solution) -> f64 {
        problem
            .order
            .iter()
            .map(|name| match self.kind {
                FitnessKind::Mcssga => self.mcssga_one(problem, plan, name),
                FitnessKind::Amaga => f64::from(u8::from(plan.is_accepted(name))),
                FitnessKind::Ampga => match problem.apps.get(name) {
                    Some(app) if plan.is_accepted(name) => f64::from(app.priority),
                    _ => 0.0,
                },
                FitnessKind::Diktyo => self.diktyo_one(problem, plan, name),
            })
            .sum()
    }

    fn mcssga_one(&self, problem: &Problem, plan: &Solution, name: &str) -> f64 {
        let Some(app) = problem.apps.get(name) else {
            return 0.0;
        };
        if !plan.is_accepted(name) {
            return 0.0;
        }

        let r = self.max_reachable_rtt;
        let own = r * cpu_ratio(problem, plan, name);
        if app.dependencies.is_empty() {
            return own * f64::from(app.priority);
        }

        let total: f64 = app
            .dependencies
            .iter()
            .map(|dep| {
                if plan.is_accepted(dep) {
                    (r - app_rtt(problem, plan, name, dep)) + own + r * cpu_ratio(problem, plan, dep)
                } else {
                    own
                }
            })
            .sum();
        total / app.dependencies.len() as f64 * f64::from(app.priority)
    }

    fn diktyo_one(&self, problem: &Problem, plan: &Solution, name: &str) -> f64 {
        let Some(app) = problem.apps.get(name) else {
            return 0.0;
        };
        let base = self.max_reachable_rtt * self.avg_dep_num;
        if !plan.is_accepted(name) {
            return -base / 2.0;
        }
        let rtt: f64 = app
            .dependencies
            .iter()
            .map(|dep| app_rtt(problem, plan, name, dep))
            .sum();
        (base - rtt).max(0.0)
    }
}

/// Largest measured RTT still below `max_acc_rtt_ms`, 0 when there is none.
pub fn max_reachable_rtt(problem: &Problem) -> f64 {
    problem
        .clouds
        .values()
        .flat_map(|cloud| cloud.net_state.values())
        .map(|state| state.rtt)
        .filter(|rtt| *rtt < problem.policy.max_acc_rtt_ms)
        .fold(0.0, f64::max)
}

pub fn avg_dep_num(problem: &Problem) -> f64 {
    if problem.apps.is_empty() {
        return 0.0;
    }
    let deps: usize = problem.apps.values().map(|app| app.dependencies.len()).sum();
    deps as f64 / problem.apps.len() as f64
}

/// Allocated over requested cores; 0 for a rejected app.
fn cpu_ratio(problem: &Problem, plan: &Solution, name: &str) -> f64 {
    match (problem.apps.get(name), plan.get(name)) {
        (Some(app), Some(gene)) if gene.accepted && app.resources.cpu_core > 0.0 => {
            gene.allocated_cpu_core / app.resources.cpu_core
        }
        _ => 0.0,
    }
}

/// RTT from `from` to `to`. Two apps on the same node talk for free; an
/// app without a placement is as far as the farthest reachable peer.
fn app_rtt(problem: &Problem, plan: &Solution, from: &str, to: &str) -> f64 {
    let (Some(a), Some(b)) = (plan.get(from), plan.get(to)) else {
        return max_reachable_rtt(problem);
    };
    if !a.accepted || !b.accepted {
        return max_reachable_rtt(problem);
    }
    if a.target_cloud == b.target_cloud && a.k8s_node == b.k8s_node {
        return 0.0;
    }
    problem
        .clouds
        .get(&a.target_cloud)
        .map(|cloud| cloud.rtt_to(&b.target_cloud))
        .unwrap_or_else(|| max_reachable_rtt(problem))
}
