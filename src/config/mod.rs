mod defaults;
mod types;

pub use types::*;

use crate::error::ConfigError;
use crate::unit::catalog;
use defaults::*;
use std::path::Path;
use std::time::Duration;

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            max_iterations: default_max_iterations(),
            quality_threshold: default_quality_threshold(),
            gap_threshold: default_gap_threshold(),
            concurrency: default_concurrency(),
            unit_timeout_sec: default_unit_timeout_sec(),
            keep_alive_sec: default_keep_alive_sec(),
            event_buffer: default_event_buffer(),
            session_ttl_sec: default_session_ttl_sec(),
            report_dir: default_report_dir(),
            retry: RetryConfig::default(),
            backend: BackendConfig::default(),
            disabled_units: Vec::new(),
        }
    }
}

impl Config {
    /// Load config from a YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load config if the file exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("Config {:?} not found, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_iterations",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=100.0).contains(&self.quality_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "quality_threshold",
                reason: format!("{} is outside 0-100", self.quality_threshold),
            });
        }
        if !(0.0..=100.0).contains(&self.gap_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "gap_threshold",
                reason: format!("{} is outside 0-100", self.gap_threshold),
            });
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "concurrency",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.unit_timeout_sec == 0 {
            return Err(ConfigError::InvalidValue {
                field: "unit_timeout_sec",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::InvalidValue {
                field: "event_buffer",
                reason: "must be at least 1".to_string(),
            });
        }

        for name in &self.disabled_units {
            if !catalog::is_known_unit(name) {
                return Err(ConfigError::UnknownUnit(name.clone()));
            }
        }

        Ok(())
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_sec)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_sec.max(1))
    }
}
