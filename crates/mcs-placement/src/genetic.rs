//! Genetic search over whole placement plans.
//!
//! A chromosome is a refined [`Solution`]; its genes are the per-app
//! decisions walked in the canonical order. Each generation runs crossover,
//! mutation and selection. Fitness, crossover pairs and mutated chromosomes
//! are computed on scoped threads, each with its own RNG seeded from the
//! master RNG before the fan-out, so one seed always gives one trace.

use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use mcs_core::config::GaConfig;
use rand::Rng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::algorithm::{ScheduleOutcome, SchedulingAlgorithm};
use crate::error::{PlacementError, PlacementResult};
use crate::fitness::{FitnessKind, FitnessModel};
use crate::problem::Problem;
use crate::random::random_accept_most;
use crate::refine::Refiner;
use crate::solution::{SingleAppSolution, Solution};
use crate::{SchedRng, rng_from_seed};

/// Mutation draws per chromosome before the original is kept unchanged.
const MUTATION_ATTEMPTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaParams {
    /// Population size N.
    pub chromosomes: usize,
    /// Generation count G.
    pub iterations: usize,
    pub crossover_prob: f64,
    pub mutation_prob: f64,
    /// Stop once the best plan has not improved for more than this many generations.
    pub stop_no_update: usize,
}

impl From<&GaConfig> for GaParams {
    fn from(config: &GaConfig) -> Self {
        Self {
            chromosomes: config.chromosomes,
            iterations: config.iterations,
            crossover_prob: config.crossover_prob,
            mutation_prob: config.mutation_prob,
            stop_no_update: config.stop_no_update,
        }
    }
}

impl Default for GaParams {
    fn default() -> Self {
        Self::from(&GaConfig::default())
    }
}

/// One GA variant: which fitness, which refiner, parallel or not.
#[derive(Debug, Clone)]
pub struct GeneticSearch {
    pub name: &'static str,
    pub params: GaParams,
    pub fitness: FitnessKind,
    pub refiner: Refiner,
    pub parallel: bool,
}

impl GeneticSearch {
    pub fn mcssga(params: GaParams) -> Self {
        Self {
            name: "Mcssga",
            params,
            fitness: FitnessKind::Mcssga,
            refiner: Refiner::Production,
            parallel: true,
        }
    }

    pub fn amaga(params: GaParams) -> Self {
        Self {
            name: "Amaga",
            params,
            fitness: FitnessKind::Amaga,
            refiner: Refiner::Comparison,
            parallel: false,
        }
    }

    pub fn ampga(params: GaParams) -> Self {
        Self {
            name: "Ampga",
            params,
            fitness: FitnessKind::Ampga,
            refiner: Refiner::Comparison,
            parallel: false,
        }
    }

    pub fn diktyoga(params: GaParams) -> Self {
        Self {
            name: "Diktyoga",
            params,
            fitness: FitnessKind::Diktyo,
            refiner: Refiner::Comparison,
            parallel: false,
        }
    }

    fn initialize(&self, problem: &Problem, rng: &mut SchedRng) -> PlacementResult<Vec<Solution>> {
        let seeds: Vec<u64> = (0..self.params.chromosomes).map(|_| rng.r#gen()).collect();
        fan_out(seeds, self.parallel, |seed| {
            random_accept_most(problem, self.refiner, &mut rng_from_seed(seed))
        })?
        .into_iter()
        .collect()
    }

    /// Binary tournaments between two distinct chromosomes; the second pick wins ties.
    fn selection(
        &self,
        problem: &Problem,
        model: &FitnessModel,
        population: Vec<Solution>,
        ledger: &mut Ledger,
        rng: &mut SchedRng,
    ) -> PlacementResult<Vec<Solution>> {
        if population.is_empty() {
            return Err(PlacementError::invariant("selection on an empty population"));
        }
        let fitness = fan_out(population.iter().collect(), self.parallel, |plan: &Solution| {
            model.evaluate(problem, plan)
        })?;

        let n = population.len();
        let mut winners = Vec::with_capacity(n);
        let mut best: Option<usize> = None;
        for _ in 0..n {
            let (first, second) = tournament_pair(n, rng);
            let winner = if fitness[first] > fitness[second] { first } else { second };
            if best.is_none_or(|b| fitness[winner] > fitness[b]) {
                best = Some(winner);
            }
            winners.push(winner);
        }

        let best = best.ok_or_else(|| PlacementError::invariant("selection picked nothing"))?;
        ledger.record(fitness[best], &population[best])?;

        Ok(winners.into_iter().map(|i| population[i].clone()).collect())
    }

    /// Pair random marked chromosomes; children first, then the untouched ones.
    fn crossover(
        &self,
        problem: &Problem,
        population: Vec<Solution>,
        rng: &mut SchedRng,
    ) -> PlacementResult<Vec<Solution>> {
        if problem.order.len() <= 1 {
            return Ok(population);
        }

        let n = population.len();
        let mut marked: Vec<usize> = (0..n)
            .filter(|_| rng.r#gen::<f64>() < self.params.crossover_prob)
            .collect();
        let mut paired = vec![false; n];
        let mut pairs = Vec::new();
        while marked.len() > 1 {
            let first = marked.remove(rng.gen_range(0..marked.len()));
            let second = marked.remove(rng.gen_range(0..marked.len()));
            paired[first] = true;
            paired[second] = true;
            pairs.push((first, second, rng.r#gen::<u64>()));
        }

        let children = fan_out(pairs, self.parallel, |(first, second, seed)| {
            all_poss_two_point_crossover(
                problem,
                self.refiner,
                &population[first],
                &population[second],
                &mut rng_from_seed(seed),
            )
        })?;

        let mut next = Vec::with_capacity(n);
        for pair in children {
            let (a, b) = pair?;
            next.push(a);
            next.push(b);
        }
        next.extend(
            population
                .into_iter()
                .zip(paired)
                .filter(|(_, was_paired)| !was_paired)
                .map(|(plan, _)| plan),
        );
        Ok(next)
    }

    fn mutation(
        &self,
        problem: &Problem,
        population: Vec<Solution>,
        rng: &mut SchedRng,
    ) -> PlacementResult<Vec<Solution>> {
        let tasks: Vec<(&Solution, u64)> = population.iter().map(|plan| (plan, rng.r#gen())).collect();
        fan_out(tasks, self.parallel, |(plan, seed)| {
            self.mutate_chromosome(problem, plan, &mut rng_from_seed(seed))
        })?
        .into_iter()
        .collect()
    }

    /// Redraw mutated genes until the chromosome refines.
    fn mutate_chromosome(&self, problem: &Problem, original: &Solution, rng: &mut SchedRng) -> PlacementResult<Solution> {
        for _ in 0..MUTATION_ATTEMPTS {
            let mut candidate = Solution::default();
            for name in &problem.order {
                let gene = original.get(name).cloned().unwrap_or_default();
                let gene = if rng.r#gen::<f64>() < self.params.mutation_prob {
                    mutate_gene(problem, &gene, rng)
                } else {
                    gene
                };
                candidate.set(name, gene);
            }
            if let Some(refined) = self.refiner.refine(problem, &candidate, rng)? {
                return Ok(refined);
            }
        }
        debug!(algorithm = self.name, attempts = MUTATION_ATTEMPTS, "no feasible mutation, keeping chromosome");
        Ok(original.clone())
    }
}

impl SchedulingAlgorithm for GeneticSearch {
    fn name(&self) -> &'static str {
        self.name
    }

    fn schedule(&self, problem: &Problem, rng: &mut SchedRng) -> PlacementResult<ScheduleOutcome> {
        let model = FitnessModel::new(self.fitness, problem);
        info!(
            algorithm = self.name,
            apps = problem.apps.len(),
            clouds = problem.clouds.len(),
            max_reachable_rtt = model.max_reachable_rtt,
            avg_dep_num = model.avg_dep_num,
            "starting genetic search"
        );

        let mut ledger = Ledger::default();
        let initial = self.initialize(problem, rng)?;
        let mut population = self.selection(problem, &model, initial, &mut ledger, rng)?;

        for iteration in 1..=self.params.iterations {
            population = self.crossover(problem, population, rng)?;
            population = self.mutation(problem, population, rng)?;
            population = self.selection(problem, &model, population, &mut ledger, rng)?;

            debug!(
                algorithm = self.name,
                iteration,
                best_this_iter = ledger.best_fitness_each_iter.last().copied().unwrap_or_default(),
                best = ledger.best_fitness_records.last().copied().unwrap_or_default(),
                no_update = ledger.no_update,
                "generation done"
            );
            if ledger.no_update > self.params.stop_no_update {
                debug!(algorithm = self.name, iteration, "stopping early");
                break;
            }
        }

        let (final_fitness, solution) = ledger.best()?;
        info!(
            algorithm = self.name,
            final_fitness,
            generations = ledger.best_fitness_each_iter.len(),
            accepted = solution.accepted_count(),
            "genetic search finished"
        );
        Ok(ScheduleOutcome {
            solution,
            best_fitness_each_iter: ledger.best_fitness_each_iter,
            final_fitness: Some(final_fitness),
        })
    }
}

/// Best fitness and plan after every generation, plus the stall counter.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    best_fitness_records: Vec<f64>,
    best_soln_records: Vec<Solution>,
    best_fitness_each_iter: Vec<f64>,
    no_update: usize,
}

impl Ledger {
    fn record(&mut self, best_this_iter: f64, plan: &Solution) -> PlacementResult<()> {
        self.check_lengths()?;
        self.best_fitness_each_iter.push(best_this_iter);

        match (self.best_fitness_records.last().copied(), self.best_soln_records.last().cloned()) {
            (Some(best), Some(best_plan)) if best_this_iter <= best => {
                self.best_fitness_records.push(best);
                self.best_soln_records.push(best_plan);
                self.no_update += 1;
            }
            _ => {
                self.best_fitness_records.push(best_this_iter);
                self.best_soln_records.push(plan.clone());
                self.no_update = 0;
            }
        }
        Ok(())
    }

    fn best(&self) -> PlacementResult<(f64, Solution)> {
        self.check_lengths()?;
        match (self.best_fitness_records.last(), self.best_soln_records.last()) {
            (Some(fitness), Some(plan)) => Ok((*fitness, plan.clone())),
            _ => Err(PlacementError::invariant("no generation was recorded")),
        }
    }

    fn check_lengths(&self) -> PlacementResult<()> {
        if self.best_fitness_records.len() != self.best_soln_records.len() {
            return Err(PlacementError::invariant(format!(
                "{} best fitness records but {} best plans",
                self.best_fitness_records.len(),
                self.best_soln_records.len()
            )));
        }
        Ok(())
    }
}

/// Two distinct population indices; a lone chromosome meets itself.
pub(crate) fn tournament_pair(n: usize, rng: &mut SchedRng) -> (usize, usize) {
    if n < 2 {
        return (0, 0);
    }
    let picks = rand::seq::index::sample(rng, n, 2);
    (picks.index(0), picks.index(1))
}

/// Try every window width and start in random order; first pair of feasible
/// children wins, otherwise the parents come back unchanged.
pub fn all_poss_two_point_crossover(
    problem: &Problem,
    refiner: Refiner,
    first: &Solution,
    second: &Solution,
    rng: &mut SchedRng,
) -> PlacementResult<(Solution, Solution)> {
    let n = problem.order.len();
    let mut widths: Vec<usize> = (1..n).collect();
    widths.shuffle(rng);

    for width in widths {
        let mut starts: Vec<usize> = (0..n).collect();
        starts.shuffle(rng);
        for start in starts {
            let (a, b) = two_point_swap(&problem.order, first, second, start, width);
            let Some(a) = refiner.refine(problem, &a, rng)? else {
                continue;
            };
            if let Some(b) = refiner.refine(problem, &b, rng)? {
                return Ok((a, b));
            }
        }
    }

    Ok((first.clone(), second.clone()))
}

/// Swap the genes at `start..start+width` (wrapping around `order`).
pub fn two_point_swap(
    order: &[String],
    first: &Solution,
    second: &Solution,
    start: usize,
    width: usize,
) -> (Solution, Solution) {
    let n = order.len();
    let mut a = Solution::default();
    let mut b = Solution::default();

    for (idx, name) in order.iter().enumerate() {
        let gene_a = first.get(name).cloned().unwrap_or_default();
        let gene_b = second.get(name).cloned().unwrap_or_default();
        if (idx + n - start % n) % n < width {
            a.set(name, gene_b);
            b.set(name, gene_a);
        } else {
            a.set(name, gene_a);
            b.set(name, gene_b);
        }
    }

    (a, b)
}

/// A fair coin for acceptance, then a random cloud other than the current one.
pub fn mutate_gene(problem: &Problem, original: &SingleAppSolution, rng: &mut SchedRng) -> SingleAppSolution {
    if !rng.gen_bool(0.5) {
        return SingleAppSolution::rejected();
    }
    let clouds: Vec<&String> = problem
        .clouds
        .keys()
        .filter(|cloud| !(original.accepted && **cloud == original.target_cloud))
        .collect();
    match clouds.choose(rng) {
        Some(cloud) => SingleAppSolution::accepted_on(cloud),
        None => SingleAppSolution::rejected(),
    }
}

/// Run `f` over `tasks`, on scoped threads when `parallel`, keeping task order.
pub(crate) fn fan_out<T, R, F>(tasks: Vec<T>, parallel: bool, f: F) -> PlacementResult<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let n = tasks.len();
    if !parallel || n <= 1 {
        return Ok(tasks.into_iter().map(f).collect());
    }

    let workers = std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .min(n);
    let mut chunks: Vec<Vec<(usize, T)>> = (0..workers).map(|_| Vec::new()).collect();
    for (idx, task) in tasks.into_iter().enumerate() {
        chunks[idx % workers].push((idx, task));
    }

    let slots: Vec<Mutex<Option<R>>> = (0..n).map(|_| Mutex::new(None)).collect();
    std::thread::scope(|scope| {
        for chunk in chunks {
            let slots = &slots;
            let f = &f;
            scope.spawn(move || {
                for (idx, task) in chunk {
                    let out = f(task);
                    *slots[idx].lock().unwrap_or_else(PoisonError::into_inner) = Some(out);
                }
            });
        }
    });

    slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| {
            slot.into_inner()
                .unwrap_or_else(PoisonError::into_inner)
                .ok_or_else(|| PlacementError::invariant(format!("worker left result slot {idx} empty")))
        })
        .collect()
}
