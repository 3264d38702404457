//! Configuration loading and typed config structures for the semantic logger.
//!
//! The canonical configuration lives in `semlog-config.yaml`. This module
//! defines strongly-typed structs that mirror the YAML structure and a
//! loader that reads and validates the file. Every field has a default, so
//! an empty document is a valid configuration.

use std::path::Path;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed correctly but is not usable.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level logger configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LoggerConfig {
    /// Task / episode identification and output location.
    #[serde(default)]
    pub session: SessionConfig,

    /// Which semantic events to detect.
    #[serde(default)]
    pub events: EventSelectionConfig,

    /// Overlap monitor tuning.
    #[serde(default)]
    pub monitors: MonitorConfig,

    /// Host frame loop settings (used by the engine binary).
    #[serde(default)]
    pub engine: EngineConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl LoggerConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// `SEMLOG_OUTPUT_DIR` overrides `session.output_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value fails validation.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // serde_yml rejects an empty document; treat it as all defaults.
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.session.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let window = self.monitors.concatenation_window;
        if !window.is_finite() || window <= 0.0 {
            return Err(ConfigError::Invalid {
                reason: format!("monitors.concatenation_window must be positive, got {window}"),
            });
        }
        let margin = self.monitors.concatenation_margin;
        if !margin.is_finite() || margin < 0.0 {
            return Err(ConfigError::Invalid {
                reason: format!("monitors.concatenation_margin must be non-negative, got {margin}"),
            });
        }
        let dt = self.engine.frame_dt;
        if !dt.is_finite() || dt <= 0.0 {
            return Err(ConfigError::Invalid {
                reason: format!("engine.frame_dt must be positive, got {dt}"),
            });
        }
        Ok(())
    }
}

/// Task / episode identification and output location.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Fixed task id (UUID). A new one is generated when absent.
    #[serde(default)]
    pub task_id: Option<String>,

    /// Fixed episode id (UUID). A new one is generated when absent.
    #[serde(default)]
    pub episode_id: Option<String>,

    /// Directory finished sessions are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Whether to also write a compact timeline file.
    #[serde(default = "default_true")]
    pub write_timelines: bool,
}

impl SessionConfig {
    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("SEMLOG_OUTPUT_DIR") {
            self.output_dir = dir;
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            task_id: None,
            episode_id: None,
            output_dir: default_output_dir(),
            write_timelines: true,
        }
    }
}

/// Which semantic events to detect.
///
/// When `selected_events_only` is false every detector is enabled and the
/// individual flags are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct EventSelectionConfig {
    /// Honour the individual flags below.
    #[serde(default)]
    pub selected_events_only: bool,

    /// Contact events.
    #[serde(default = "default_true")]
    pub contact: bool,

    /// Grasp events.
    #[serde(default = "default_true")]
    pub grasp: bool,

    /// Reach events (need grasp detection).
    #[serde(default = "default_true")]
    pub reach: bool,

    /// Pick-up / transport / put-down events (need grasp detection).
    #[serde(default = "default_true")]
    pub pick_and_place: bool,

    /// Slicing events of blade monitors.
    #[serde(default = "default_true")]
    pub slicing: bool,
}

impl EventSelectionConfig {
    /// Effective contact flag.
    pub const fn contact(&self) -> bool {
        !self.selected_events_only || self.contact
    }

    /// Effective grasp flag. Reach and pick-and-place imply grasp.
    pub const fn grasp(&self) -> bool {
        !self.selected_events_only || self.grasp || self.reach || self.pick_and_place
    }

    /// Effective reach flag.
    pub const fn reach(&self) -> bool {
        !self.selected_events_only || self.reach
    }

    /// Effective pick-and-place flag.
    pub const fn pick_and_place(&self) -> bool {
        !self.selected_events_only || self.pick_and_place
    }

    /// Effective slicing flag.
    pub const fn slicing(&self) -> bool {
        !self.selected_events_only || self.slicing
    }
}

impl Default for EventSelectionConfig {
    fn default() -> Self {
        Self {
            selected_events_only: false,
            contact: true,
            grasp: true,
            reach: true,
            pick_and_place: true,
            slicing: true,
        }
    }
}

/// Overlap monitor tuning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MonitorConfig {
    /// Maximum gap (seconds) between an end and a following begin for the
    /// two to be merged into one continuous contact.
    #[serde(default = "default_concatenation_window")]
    pub concatenation_window: f64,

    /// Extra delay (seconds) added to the window when scheduling a sweep of
    /// pending ends.
    #[serde(default = "default_concatenation_margin")]
    pub concatenation_margin: f64,

    /// Track a debug indicator state per monitor for host visualizers.
    #[serde(default)]
    pub visual_debug: bool,

    /// Trace every accepted overlap signal.
    #[serde(default)]
    pub log_debug: bool,
}

impl MonitorConfig {
    /// Delay between an end and the sweep that may publish it.
    pub fn sweep_delay(&self) -> f64 {
        self.concatenation_window + self.concatenation_margin
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            concatenation_window: default_concatenation_window(),
            concatenation_margin: default_concatenation_margin(),
            visual_debug: false,
            log_debug: false,
        }
    }
}

/// Host frame loop settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EngineConfig {
    /// Real-time milliseconds between frames (0 = as fast as possible).
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,

    /// Simulated seconds per frame.
    #[serde(default = "default_frame_dt")]
    pub frame_dt: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            frame_dt: default_frame_dt(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (required by serde)
// ---------------------------------------------------------------------------

const fn default_true() -> bool {
    true
}

fn default_output_dir() -> String {
    "SL".to_owned()
}

const fn default_concatenation_window() -> f64 {
    0.15
}

const fn default_concatenation_margin() -> f64 {
    0.05
}

const fn default_frame_interval_ms() -> u64 {
    16
}

const fn default_frame_dt() -> f64 {
    0.016
}

fn default_log_level() -> String {
    "info".to_owned()
}
