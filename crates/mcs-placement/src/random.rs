//! Random plan generators and the two random baselines.

use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::SchedRng;
use crate::algorithm::{ScheduleOutcome, SchedulingAlgorithm};
use crate::error::{PlacementError, PlacementResult};
use crate::problem::Problem;
use crate::refine::Refiner;
use crate::solution::{SingleAppSolution, Solution};

/// Accept as many apps as a random walk allows.
///
/// Apps are visited in random order, each once, and never before all of its
/// dependencies were visited. Each app tries the clouds in random order and
/// keeps the first one under which the plan still refines.
pub fn random_accept_most(problem: &Problem, refiner: Refiner, rng: &mut SchedRng) -> PlacementResult<Solution> {
    let mut plan = refiner
        .refine(problem, &Solution::all_rejected(&problem.order), rng)?
        .ok_or_else(|| PlacementError::invariant("the all-rejected plan does not refine"))?;

    let clouds: Vec<&String> = problem.clouds.keys().collect();
    let mut untried: Vec<String> = problem.order.clone();

    while !untried.is_empty() {
        let ready: Vec<usize> = (0..untried.len())
            .filter(|&i| {
                problem.apps.get(&untried[i]).is_none_or(|app| {
                    app.dependencies.iter().all(|dep| !untried.contains(dep))
                })
            })
            .collect();
        // Only a dependency cycle leaves nothing ready; fall back to any app.
        let idx = match ready.choose(rng) {
            Some(&i) => i,
            None => rng.gen_range(0..untried.len()),
        };
        let name = untried.remove(idx);

        let deps_accepted = problem
            .apps
            .get(&name)
            .is_some_and(|app| app.dependencies.iter().all(|dep| plan.is_accepted(dep)));
        if !deps_accepted {
            continue;
        }

        let mut candidates = clouds.clone();
        candidates.shuffle(rng);
        for cloud in candidates {
            let mut trial = plan.clone();
            trial.set(&name, SingleAppSolution::accepted_on(cloud));
            if let Some(refined) = refiner.refine(problem, &trial, rng)? {
                plan = refined;
                break;
            }
        }
    }

    Ok(plan)
}

/// One fair coin per app, one uniform cloud per accepted app.
pub fn random_raw_plan(problem: &Problem, rng: &mut SchedRng) -> Solution {
    let clouds: Vec<&String> = problem.clouds.keys().collect();
    let mut plan = Solution::default();
    for name in &problem.order {
        let accepted = rng.gen_bool(0.5);
        let gene = match clouds.choose(rng) {
            Some(cloud) if accepted => SingleAppSolution::accepted_on(cloud),
            _ => SingleAppSolution::rejected(),
        };
        plan.set(name, gene);
    }
    plan
}

/// Completely random baseline: a single random plan, unusable if it does not refine.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompRand;

impl SchedulingAlgorithm for CompRand {
    fn name(&self) -> &'static str {
        "CompRand"
    }

    fn schedule(&self, problem: &Problem, rng: &mut SchedRng) -> PlacementResult<ScheduleOutcome> {
        let raw = random_raw_plan(problem, rng);
        debug!(accepted = raw.accepted_count(), "random raw plan drawn");
        match Refiner::Comparison.refine(problem, &raw, rng)? {
            Some(solution) => Ok(ScheduleOutcome::single(solution)),
            None => Err(PlacementError::Unusable {
                algorithm: self.name().to_string(),
            }),
        }
    }
}

/// Best-effort random baseline: one accept-most walk with the comparison refiner.
#[derive(Debug, Clone, Copy, Default)]
pub struct BeRand;

impl SchedulingAlgorithm for BeRand {
    fn name(&self) -> &'static str {
        "BERand"
    }

    fn schedule(&self, problem: &Problem, rng: &mut SchedRng) -> PlacementResult<ScheduleOutcome> {
        let solution = random_accept_most(problem, Refiner::Comparison, rng)?;
        info!(algorithm = self.name(), accepted = solution.accepted_count(), "random walk finished");
        Ok(ScheduleOutcome::single(solution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refine::acceptable;
    use crate::refine::tests::{make_app, make_apps, make_clouds};
    use crate::rng_from_seed;
    use crate::vm_alloc::tests::make_problem;

    #[test]
    fn accept_most_accepts_everything_that_fits() {
        let problem = make_problem(make_clouds(), make_apps());
        for seed in 0..5 {
            let plan = random_accept_most(&problem, Refiner::Production, &mut rng_from_seed(seed)).unwrap();
            assert!(acceptable(&problem, &plan));
            // NOKIA4 alone has room for the whole batch.
            assert_eq!(plan.accepted_count(), 4, "seed {seed}");
        }
    }

    #[test]
    fn accept_most_rejects_what_fits_nowhere() {
        let mut apps = make_apps();
        apps.push(make_app("huge", 4.0, 1_000_000.0, 10.0, 5));
        let problem = make_problem(make_clouds(), apps);
        let plan = random_accept_most(&problem, Refiner::Comparison, &mut rng_from_seed(9)).unwrap();
        assert!(!plan.is_accepted("huge"));
        assert!(acceptable(&problem, &plan));
    }

    #[test]
    fn accept_most_is_seeded() {
        let problem = make_problem(make_clouds(), make_apps());
        let a = random_accept_most(&problem, Refiner::Production, &mut rng_from_seed(42)).unwrap();
        let b = random_accept_most(&problem, Refiner::Production, &mut rng_from_seed(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn raw_plan_covers_every_app() {
        let problem = make_problem(make_clouds(), make_apps());
        let raw = random_raw_plan(&problem, &mut rng_from_seed(3));
        assert_eq!(raw.apps_solution.len(), 4);
        for gene in raw.apps_solution.values().filter(|g| g.accepted) {
            assert!(problem.clouds.contains_key(&gene.target_cloud));
        }
    }

    #[test]
    fn comp_rand_reports_unusable_plans() {
        let apps = vec![make_app("huge", 4.0, 1_000_000.0, 10.0, 5)];
        let problem = make_problem(make_clouds(), apps);

        let mut unusable = 0;
        for seed in 0..20 {
            match CompRand.schedule(&problem, &mut rng_from_seed(seed)) {
                Ok(outcome) => assert!(!outcome.solution.is_accepted("huge")),
                Err(PlacementError::Unusable { algorithm }) => {
                    assert_eq!(algorithm, "CompRand");
                    unusable += 1;
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert!(unusable > 0);
    }

    #[test]
    fn comp_rand_error_text() {
        let err = PlacementError::Unusable {
            algorithm: "CompRand".into(),
        };
        assert!(err.to_string().contains("unusable solution"));
    }

    #[test]
    fn be_rand_plan_is_acceptable() {
        let problem = make_problem(make_clouds(), make_apps());
        let outcome = BeRand.schedule(&problem, &mut rng_from_seed(5)).unwrap();
        assert!(acceptable(&problem, &outcome.solution));
        assert!(outcome.best_fitness_each_iter.is_empty());
        assert_eq!(outcome.final_fitness, None);
    }
}
