//! Plan-execute-reflect orchestration of travel analysis units
//!
//! `IntelligenceService` is the entry point: it validates a trip request,
//! runs every city through the phase scheduler and reflection loop, and
//! streams progress events to the caller.

pub mod cli;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod output;
pub mod provider;
pub mod reflection;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod unit;

pub use config::Config;
pub use error::TripIntelError;
pub use service::{IntelligenceService, TripRequest};
