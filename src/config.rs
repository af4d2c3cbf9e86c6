//! Monitor configuration.
//!
//! All tunables live in one immutable value that is handed to the parser,
//! the store and the feed at construction time.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collector::filter::SelectionFilter;

/// Error loading a configuration file.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Json(e) => write!(f, "JSON error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)] // missing fields fall back to the defaults below
pub struct MonitorConfig {
    /// Retention cap of every series (points).
    pub max_data_points: usize,
    /// Maximum process observations accepted from one snapshot.
    pub max_process_num: usize,
    /// Process rows with `%CPU <= min_cpu` are dropped.
    pub min_cpu: f64,
    /// Allow-list of normalized labels; empty allows all.
    pub selected_processes: Vec<String>,
    /// Deny-list of normalized labels.
    pub excluded_processes: Vec<String>,
    /// Calibration added to `100 - idle` for the "Total CPU" series.
    pub cpu_offset: f64,
    /// Lines a pending snapshot may hold before it is discarded.
    pub max_pending_lines: usize,
    /// Raw lines archived per snapshot.
    pub archive_max_lines: usize,
    /// Bound of the producer → consumer line channel.
    pub channel_capacity: usize,
    /// Feed lines longer than this many bytes are truncated.
    pub max_line_bytes: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_data_points: 60,
            max_process_num: 5,
            min_cpu: 0.06,
            selected_processes: Vec::new(),
            excluded_processes: vec!["prank".to_string()],
            cpu_offset: 4.0,
            max_pending_lines: 4096,
            archive_max_lines: 100,
            channel_capacity: 1024,
            max_line_bytes: 64 * 1024,
        }
    }
}

impl MonitorConfig {
    /// Loads a JSON configuration file. Absent keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: MonitorConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make the pipeline unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_data_points == 0 {
            return Err(ConfigError::Invalid("max_data_points must be > 0".into()));
        }
        if self.max_pending_lines < 2 {
            return Err(ConfigError::Invalid("max_pending_lines must be >= 2".into()));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid("channel_capacity must be > 0".into()));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::Invalid("max_line_bytes must be > 0".into()));
        }
        if !self.min_cpu.is_finite() || !self.cpu_offset.is_finite() {
            return Err(ConfigError::Invalid(
                "min_cpu and cpu_offset must be finite".into(),
            ));
        }
        Ok(())
    }

    pub fn selection_filter(&self) -> SelectionFilter {
        SelectionFilter::new(
            self.selected_processes.iter().cloned(),
            self.excluded_processes.iter().cloned(),
        )
    }
}
