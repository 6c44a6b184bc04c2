use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TripIntelError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Unknown unit '{0}' in disabled_units")]
    UnknownUnit(String),
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Execution timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Process failed with exit code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error("Could not find JSON in backend output: {0}")]
    NoJson(String),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum UnitError {
    #[error("Missing required inputs: {}", .0.join(", "))]
    Validation(Vec<String>),

    #[error("{0}")]
    Execution(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Unit timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Unit '{0}' does not support refinement")]
    RefinementUnsupported(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("City '{0}' has not been initialized")]
    CityNotFound(String),

    #[error("Task '{task}' has not been initialized for city '{city}'")]
    TaskNotFound { city: String, task: String },

    #[error("Session '{0}' not found")]
    SessionNotFound(String),

    #[error("State lock poisoned: {0}")]
    Poisoned(String),
}

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Unit '{unit}' depends on unknown unit '{dependency}'")]
    UnknownDependency { unit: String, dependency: String },

    #[error("Dependency cycle among units: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("No units registered")]
    Empty,
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Failed to acquire semaphore: {0}")]
    Semaphore(#[from] tokio::sync::AcquireError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("Request is missing the cities array")]
    MissingCities,

    #[error("Request is missing the nights-per-city map")]
    MissingNights,

    #[error("Request is missing the trip context")]
    MissingTripContext,

    #[error("No nights assigned for city '{0}'")]
    NightsNotAssigned(String),

    #[error("City '{0}' appears more than once in the route")]
    DuplicateCity(String),

    #[error("Session '{0}' already exists")]
    DuplicateSession(String),
}

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to create output directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Failed to write report: {0}")]
    WriteReport(std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
