//! The read-only input of one scheduling run.

use std::collections::BTreeMap;

use mcs_core::config::PlacementConfig;
use rand::seq::SliceRandom;

use crate::SchedRng;
use crate::application::Application;
use crate::cloud::Cloud;
use crate::error::{PlacementError, PlacementResult};

/// Clouds, apps, canonical order and tunables, shared by every search step.
#[derive(Debug, Clone)]
pub struct Problem {
    pub clouds: BTreeMap<String, Cloud>,
    pub apps: BTreeMap<String, Application>,
    /// Canonical app order; a permutation of `apps`' keys.
    pub order: Vec<String>,
    pub policy: PlacementConfig,
}

impl Problem {
    pub fn new(
        clouds: impl IntoIterator<Item = Cloud>,
        apps: impl IntoIterator<Item = Application>,
        order: Vec<String>,
        policy: PlacementConfig,
    ) -> PlacementResult<Self> {
        let problem = Self {
            clouds: clouds.into_iter().map(|c| (c.name.clone(), c)).collect(),
            apps: apps.into_iter().map(|a| (a.name.clone(), a)).collect(),
            order,
            policy,
        };
        problem.check_order()?;
        Ok(problem)
    }

    /// A seeded permutation of the app names.
    pub fn canonical_order<'a>(names: impl IntoIterator<Item = &'a String>, rng: &mut SchedRng) -> Vec<String> {
        let mut order: Vec<String> = names.into_iter().cloned().collect();
        order.sort();
        order.shuffle(rng);
        order
    }

    pub fn cpu_core_step(&self) -> f64 {
        self.policy.cpu_core_step
    }

    fn check_order(&self) -> PlacementResult<()> {
        let mut sorted = self.order.clone();
        sorted.sort();
        sorted.dedup();
        let keys: Vec<&String> = self.apps.keys().collect();
        if sorted.len() != self.order.len() || sorted.iter().collect::<Vec<_>>() != keys {
            return Err(PlacementError::invariant(format!(
                "canonical order {:?} is not a permutation of the {} applications",
                self.order,
                self.apps.len()
            )));
        }
        Ok(())
    }
}
