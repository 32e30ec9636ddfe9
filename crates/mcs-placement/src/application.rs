//! Applications as the placement core sees them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resources::GenericResources;

pub const MIN_PRIORITY: i32 = 1;
/// The top class; only these apps may receive dedicated VMs.
pub const MAX_PRIORITY: i32 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    pub priority: i32,
    /// Requested resources.
    pub resources: GenericResources,
    /// Names of the apps this one depends on.
    pub dependencies: Vec<String>,
}

impl Application {
    pub fn new(name: &str, priority: i32, resources: GenericResources) -> Self {
        Self {
            name: name.to_string(),
            priority,
            resources,
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn is_max_priority(&self) -> bool {
        self.priority == MAX_PRIORITY
    }

    /// CPU allocation weight: `priority × requested cores`.
    pub fn weight(&self) -> f64 {
        f64::from(self.priority) * self.resources.cpu_core
    }
}

/// Which priority classes a traversal or allocation pass handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityFilter {
    All,
    MaxPriority,
    NotMaxPriority,
}

impl PriorityFilter {
    pub fn admits(&self, app: &Application) -> bool {
        match self {
            PriorityFilter::All => true,
            PriorityFilter::MaxPriority => app.is_max_priority(),
            PriorityFilter::NotMaxPriority => !app.is_max_priority(),
        }
    }
}

/// Sum of the requested resources of `names`.
///
/// With `min_cpu` each app counts for `cpu_core_step` cores instead of its request.
pub fn needed_resources(
    apps: &BTreeMap<String, Application>,
    names: &[String],
    min_cpu: Option<f64>,
) -> GenericResources {
    names
        .iter()
        .filter_map(|name| apps.get(name))
        .map(|app| {
            let mut res = app.resources;
            if let Some(step) = min_cpu {
                res.cpu_core = step;
            }
            res
        })
        .sum()
}
