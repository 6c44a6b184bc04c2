//! Input, context and output types shared by every task unit

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::store::{City, Preferences, TripContext};

/// Input field names understood by `UnitInput::has_field`
pub mod fields {
    pub const CITY: &str = "city";
    pub const NIGHTS: &str = "nights";
    pub const PREFERENCES: &str = "preferences";
    pub const TRIP_CONTEXT: &str = "tripContext";
    pub const REFINEMENT_INSTRUCTIONS: &str = "refinementInstructions";
    pub const DEPENDENCY_PREFIX: &str = "dependency:";

    pub fn dependency(unit: &str) -> String {
        format!("{}{}", DEPENDENCY_PREFIX, unit)
    }
}

/// Output slot names written into `CityIntelligence::outputs`
pub mod slots {
    pub const NARRATIVE: &str = "narrative";
    pub const TIME_BLOCKS: &str = "timeBlocks";
    pub const CLUSTERS: &str = "clusters";
    pub const PREFERENCE_MATCH: &str = "preferenceMatch";
    pub const HIDDEN_GEMS: &str = "hiddenGems";
    pub const LOGISTICS: &str = "logistics";
    pub const WEATHER: &str = "weather";
    pub const PHOTO_SPOTS: &str = "photoSpots";
    pub const SYNTHESIS: &str = "synthesis";
}

/// A note one unit leaves for another
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Suggestion {
    /// Name of the unit the suggestion is addressed to
    pub target: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOutput {
    pub success: bool,

    /// Keyed by the producing unit's declared output names
    pub data: BTreeMap<String, Value>,

    /// 0-100
    pub confidence: f64,

    pub gaps: Vec<String>,

    pub suggestions: Vec<Suggestion>,

    pub execution_time_ms: u64,
}

impl TaskOutput {
    /// The degraded shape every unit failure collapses into
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: BTreeMap::new(),
            confidence: 0.0,
            gaps: vec![message.into()],
            suggestions: Vec::new(),
            execution_time_ms: 0,
        }
    }

    pub fn from_result(result: UnitResult) -> Self {
        Self {
            success: true,
            data: result.data,
            confidence: result.confidence.clamp(0.0, 100.0),
            gaps: result.gaps,
            suggestions: result.suggestions,
            execution_time_ms: 0,
        }
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.execution_time_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn error_message(&self) -> Option<String> {
        if self.success {
            None
        } else {
            Some(self.gaps.join("; "))
        }
    }
}

/// What a unit's `run` hands back before the execution wrapper stamps it
#[derive(Debug, Clone, Default)]
pub struct UnitResult {
    pub data: BTreeMap<String, Value>,
    pub confidence: f64,
    pub gaps: Vec<String>,
    pub suggestions: Vec<Suggestion>,
}

impl UnitResult {
    pub fn new(confidence: f64) -> Self {
        Self {
            confidence,
            ..Self::default()
        }
    }

    pub fn with_slot(mut self, slot: &str, value: Value) -> Self {
        self.data.insert(slot.to_string(), value);
        self
    }

    pub fn with_gap(mut self, gap: impl Into<String>) -> Self {
        self.gaps.push(gap.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub valid: bool,
    pub missing_fields: Vec<String>,
}

/// Shared input built once per phase
#[derive(Debug, Clone)]
pub struct UnitInput {
    pub city: City,
    pub nights: u32,
    pub preferences: Preferences,
    pub trip: Option<TripContext>,
    /// Outputs of units that already ran for this city, keyed by unit name
    pub previous_outputs: Arc<BTreeMap<String, TaskOutput>>,
    pub refinement_instructions: Option<String>,
}

impl UnitInput {
    pub fn new(city: City, nights: u32, preferences: Preferences) -> Self {
        Self {
            city,
            nights,
            preferences,
            trip: None,
            previous_outputs: Arc::new(BTreeMap::new()),
            refinement_instructions: None,
        }
    }

    pub fn with_trip(mut self, trip: TripContext) -> Self {
        self.trip = Some(trip);
        self
    }

    pub fn with_previous_outputs(mut self, outputs: BTreeMap<String, TaskOutput>) -> Self {
        self.previous_outputs = Arc::new(outputs);
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.refinement_instructions = Some(instructions.into());
        self
    }

    /// Whether a named input is present. `dependency:<unit>` counts only a
    /// successful output of that unit.
    pub fn has_field(&self, field: &str) -> bool {
        if let Some(unit) = field.strip_prefix(fields::DEPENDENCY_PREFIX) {
            return self.dependency(unit).is_some();
        }
        match field {
            fields::CITY => !self.city.id.is_empty() && !self.city.name.is_empty(),
            fields::NIGHTS => self.nights > 0,
            fields::PREFERENCES => true,
            fields::TRIP_CONTEXT => self.trip.is_some(),
            fields::REFINEMENT_INSTRUCTIONS => self
                .refinement_instructions
                .as_deref()
                .is_some_and(|s| !s.trim().is_empty()),
            _ => false,
        }
    }

    pub fn dependency(&self, unit: &str) -> Option<&TaskOutput> {
        self.previous_outputs.get(unit).filter(|out| out.success)
    }

    pub fn dependency_slot(&self, unit: &str, slot: &str) -> Option<&Value> {
        self.dependency(unit).and_then(|out| out.data.get(slot))
    }
}

pub type ProgressFn = Arc<dyn Fn(u8) + Send + Sync>;

/// Per-execution context handed to a unit
#[derive(Clone)]
pub struct UnitContext {
    pub session_id: String,
    pub iteration: u32,
    /// Upper bound on a single `run`
    pub timeout: Duration,
    progress: ProgressFn,
}

impl UnitContext {
    pub fn new(session_id: impl Into<String>, iteration: u32, timeout: Duration) -> Self {
        Self {
            session_id: session_id.into(),
            iteration,
            timeout,
            progress: Arc::new(|_| {}),
        }
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = progress;
        self
    }

    pub fn report_progress(&self, percent: u8) {
        (self.progress)(percent.min(100));
    }
}

impl std::fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitContext")
            .field("session_id", &self.session_id)
            .field("iteration", &self.iteration)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
