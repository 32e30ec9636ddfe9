//! Algorithm selection and the common scheduling interface.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::SchedRng;
use crate::error::{PlacementError, PlacementResult};
use crate::genetic::{GaParams, GeneticSearch};
use crate::problem::Problem;
use crate::random::{BeRand, CompRand};
use crate::solution::Solution;

/// What a scheduling algorithm returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleOutcome {
    pub solution: Solution,
    /// Best fitness of each generation; empty for the random baselines.
    pub best_fitness_each_iter: Vec<f64>,
    pub final_fitness: Option<f64>,
}

impl ScheduleOutcome {
    /// An outcome without a fitness trace.
    pub fn single(solution: Solution) -> Self {
        Self {
            solution,
            best_fitness_each_iter: Vec::new(),
            final_fitness: None,
        }
    }
}

pub trait SchedulingAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce a feasible plan for `problem`, drawing randomness from `rng` only.
    fn schedule(&self, problem: &Problem, rng: &mut SchedRng) -> PlacementResult<ScheduleOutcome>;
}

/// The algorithms a request can ask for by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmKind {
    Mcssga,
    CompRand,
    BeRand,
    Amaga,
    Ampga,
    Diktyoga,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 6] = [
        AlgorithmKind::Mcssga,
        AlgorithmKind::CompRand,
        AlgorithmKind::BeRand,
        AlgorithmKind::Amaga,
        AlgorithmKind::Ampga,
        AlgorithmKind::Diktyoga,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmKind::Mcssga => "Mcssga",
            AlgorithmKind::CompRand => "CompRand",
            AlgorithmKind::BeRand => "BERand",
            AlgorithmKind::Amaga => "Amaga",
            AlgorithmKind::Ampga => "Ampga",
            AlgorithmKind::Diktyoga => "Diktyoga",
        }
    }

    /// Instantiate the algorithm; GA variants take `params`.
    pub fn build(&self, params: GaParams) -> Box<dyn SchedulingAlgorithm> {
        match self {
            AlgorithmKind::Mcssga => Box::new(GeneticSearch::mcssga(params)),
            AlgorithmKind::CompRand => Box::new(CompRand),
            AlgorithmKind::BeRand => Box::new(BeRand),
            AlgorithmKind::Amaga => Box::new(GeneticSearch::amaga(params)),
            AlgorithmKind::Ampga => Box::new(GeneticSearch::ampga(params)),
            AlgorithmKind::Diktyoga => Box::new(GeneticSearch::diktyoga(params)),
        }
    }
}

impl fmt::Display for AlgorithmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlgorithmKind {
    type Err = PlacementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlgorithmKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| PlacementError::UnknownAlgorithm(s.to_string()))
    }
}
