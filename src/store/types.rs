//! Records held by the session state store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::reflection::Reflection;
use crate::unit::TaskOutput;

pub type CityId = String;

/// A stop on the route
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct City {
    pub id: CityId,

    pub name: String,

    #[serde(default)]
    pub country: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub latitude: Option<f64>,

    #[serde(default)]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TripContext {
    pub origin: String,

    pub destination: String,

    #[serde(default)]
    pub total_nights: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Preferences {
    #[serde(default)]
    pub interests: Vec<String>,

    /// Dietary requirements such as "vegetarian" or "halal"
    #[serde(default)]
    pub dietary: Vec<String>,

    #[serde(default)]
    pub pace: Pace,

    #[serde(default)]
    pub budget: Option<String>,

    #[serde(default)]
    pub travel_style: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Pace {
    Relaxed,
    #[default]
    Moderate,
    Packed,
}

impl Pace {
    /// Comfortable number of scheduled blocks per day
    pub fn blocks_per_day(self) -> f64 {
        match self {
            Pace::Relaxed => 2.0,
            Pace::Moderate => 3.0,
            Pace::Packed => 4.0,
        }
    }
}

impl std::fmt::Display for Pace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pace::Relaxed => write!(f, "relaxed"),
            Pace::Moderate => write!(f, "moderate"),
            Pace::Packed => write!(f, "packed"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorPhase {
    #[default]
    Planning,
    Executing,
    Reflecting,
    Refining,
    Complete,
}

impl std::fmt::Display for OrchestratorPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorPhase::Planning => write!(f, "planning"),
            OrchestratorPhase::Executing => write!(f, "executing"),
            OrchestratorPhase::Reflecting => write!(f, "reflecting"),
            OrchestratorPhase::Refining => write!(f, "refining"),
            OrchestratorPhase::Complete => write!(f, "complete"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub user_id: Option<String>,
    pub trip: TripContext,
    pub preferences: Preferences,
    pub created_at: DateTime<Utc>,
    pub phase: OrchestratorPhase,
    pub current_city: Option<CityId>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: String,
        user_id: Option<String>,
        trip: TripContext,
        preferences: Preferences,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            trip,
            preferences,
            created_at: now,
            phase: OrchestratorPhase::Planning,
            current_city: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CityStatus {
    #[default]
    Pending,
    Processing,
    Complete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskState {
    pub name: String,
    pub status: TaskStatus,
    /// 0-100, never lowered by an update within one execution
    pub progress: u8,
    pub output: Option<TaskOutput>,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: TaskStatus::Pending,
            progress: 0,
            output: None,
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Shallow update applied by `SharedMemory::update_task_state`
#[derive(Debug, Clone, Default)]
pub struct TaskStatePatch {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub output: Option<TaskOutput>,
    pub error: Option<String>,
}

impl TaskStatePatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CityIntelligence {
    pub city: City,
    pub nights: u32,
    pub status: CityStatus,
    pub quality: f64,
    pub iteration: u32,
    pub tasks: BTreeMap<String, TaskState>,
    /// Output slot name -> latest accepted value
    pub outputs: BTreeMap<String, Value>,
    pub reflections: Vec<Reflection>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CityIntelligence {
    pub fn new(city: City, nights: u32) -> Self {
        let now = Utc::now();
        Self {
            city,
            nights,
            status: CityStatus::Pending,
            quality: 0.0,
            iteration: 0,
            tasks: BTreeMap::new(),
            outputs: BTreeMap::new(),
            reflections: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn slot(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    pub fn latest_reflection(&self) -> Option<&Reflection> {
        self.reflections.last()
    }
}
