use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::defaults::*;

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Upper bound on plan/execute/reflect passes per city
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Quality score (0-100) at which a city stops iterating
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,

    /// Category score below which a gap is reported
    #[serde(default = "default_gap_threshold")]
    pub gap_threshold: f64,

    /// Max units running at once inside a parallel phase
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_unit_timeout_sec")]
    pub unit_timeout_sec: u64,

    /// Interval between keep-alive frames on the event stream
    #[serde(default = "default_keep_alive_sec")]
    pub keep_alive_sec: u64,

    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Sessions older than this are removed by `purge_expired`
    #[serde(default = "default_session_ttl_sec")]
    pub session_ttl_sec: u64,

    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    /// Units removed from the registry before planning
    #[serde(default)]
    pub disabled_units: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(default = "default_claude_binary")]
    pub binary: PathBuf,

    #[serde(default = "default_claude_model")]
    pub model: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            binary: default_claude_binary(),
            model: default_claude_model(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    ClaudeCli,
    /// Every unit is served by its placeholder implementation
    Offline,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::ClaudeCli => write!(f, "claude_cli"),
            BackendKind::Offline => write!(f, "offline"),
        }
    }
}
