//! Phase scheduler
//!
//! Layers units into phases from their declared dependencies. A unit lands in
//! the phase after its deepest dependency, so members of one phase never
//! depend on each other and can run side by side.

mod types;

pub use types::*;

use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

use crate::error::SchedulerError;
use crate::unit::UnitRegistry;

/// Layer a dependency map (unit -> units it depends on) into ordered phases
pub fn layer(deps: &BTreeMap<String, Vec<String>>) -> Result<Vec<Vec<String>>, SchedulerError> {
    if deps.is_empty() {
        return Err(SchedulerError::Empty);
    }

    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for name in deps.keys() {
        in_degree.insert(name.as_str(), 0);
        dependents.entry(name.as_str()).or_default();
    }

    for (name, unit_deps) in deps {
        let unique: BTreeSet<&str> = unit_deps.iter().map(String::as_str).collect();
        for dep in unique {
            if !deps.contains_key(dep) {
                return Err(SchedulerError::UnknownDependency {
                    unit: name.clone(),
                    dependency: dep.to_string(),
                });
            }
            dependents.entry(dep).or_default().push(name.as_str());
            *in_degree.entry(name.as_str()).or_insert(0) += 1;
        }
    }

    let mut level: BTreeMap<&str, usize> = BTreeMap::new();
    let mut ready: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(name, _)| *name)
        .collect();
    for name in &ready {
        level.insert(*name, 0);
    }

    let mut visited = 0;
    while let Some(name) = ready.pop_front() {
        visited += 1;
        let current = level.get(name).copied().unwrap_or(0);

        for &dependent in dependents.get(name).into_iter().flatten() {
            let slot = level.entry(dependent).or_insert(0);
            *slot = (*slot).max(current + 1);

            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(dependent);
                }
            }
        }
    }

    if visited < deps.len() {
        let stuck = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        return Err(SchedulerError::Cycle(stuck));
    }

    let depth = level.values().copied().max().unwrap_or(0) + 1;
    let mut phases: Vec<Vec<String>> = vec![Vec::new(); depth];
    for (name, lvl) in level {
        phases[lvl].push(name.to_string());
    }
    Ok(phases)
}

fn describe(number: usize, units: &[String], terminal: bool) -> String {
    let label = match (number, terminal) {
        (1, _) => "Foundation",
        (_, true) => "Synthesis",
        _ => "Analysis",
    };
    format!("{}: {}", label, units.join(", "))
}

/// Builds execution plans from the units registered for one orchestrator
#[derive(Debug, Clone)]
pub struct PhaseScheduler {
    phases: Vec<Phase>,
}

impl PhaseScheduler {
    pub fn new(registry: &UnitRegistry) -> Result<Self, SchedulerError> {
        Self::from_dependencies(&registry.dependency_map())
    }

    pub fn from_dependencies(deps: &BTreeMap<String, Vec<String>>) -> Result<Self, SchedulerError> {
        let layers = layer(deps)?;
        let count = layers.len();

        let phases = layers
            .into_iter()
            .enumerate()
            .map(|(idx, units)| {
                let number = idx + 1;
                let terminal = number == count && count > 1;
                Phase {
                    number,
                    parallel: !(terminal && units.len() == 1),
                    description: describe(number, &units, terminal),
                    units,
                }
            })
            .collect::<Vec<_>>();

        debug!(
            "Scheduled {} units into {} phases",
            deps.len(),
            phases.len()
        );
        Ok(Self { phases })
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Full plan for the first iteration
    pub fn plan(&self, iteration: u32) -> ExecutionPlan {
        ExecutionPlan {
            iteration,
            phases: self.phases.clone(),
            steering: BTreeMap::new(),
            selected: None,
            created_at: Utc::now(),
        }
    }

    /// Same phase structure, restricted to `units` and carrying their steering text
    pub fn refinement_plan(
        &self,
        iteration: u32,
        steering: BTreeMap<String, String>,
    ) -> ExecutionPlan {
        let selected = steering.keys().cloned().collect();
        ExecutionPlan {
            iteration,
            phases: self.phases.clone(),
            steering,
            selected: Some(selected),
            created_at: Utc::now(),
        }
    }
}
