use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One layer of the plan; every member depends only on earlier phases
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Phase {
    /// 1-based
    pub number: usize,
    pub units: Vec<String>,
    pub parallel: bool,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub iteration: u32,
    pub phases: Vec<Phase>,

    /// Per-unit instruction text carried from the previous reflection
    pub steering: BTreeMap<String, String>,

    /// Units allowed to run this iteration; `None` runs everything
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<BTreeSet<String>>,

    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    pub fn is_selected(&self, unit: &str) -> bool {
        self.selected
            .as_ref()
            .map(|set| set.contains(unit))
            .unwrap_or(true)
    }

    /// Members of `phase` that run in this iteration
    pub fn runnable<'a>(&'a self, phase: &'a Phase) -> Vec<&'a str> {
        phase
            .units
            .iter()
            .map(String::as_str)
            .filter(|unit| self.is_selected(unit))
            .collect()
    }

    pub fn instructions_for(&self, unit: &str) -> Option<&str> {
        self.steering.get(unit).map(String::as_str)
    }
}
