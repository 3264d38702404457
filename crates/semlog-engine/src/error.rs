//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure that can stop the engine before or
//! while a session runs. Failures inside a running session never surface
//! here: the logger logs and recovers from those itself.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: semlog_core::ConfigError,
    },

    /// The scenario file could not be read.
    #[error("failed to read scenario {path}: {source}")]
    ScenarioIo {
        /// Scenario path.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The scenario file is not valid YAML for a scenario.
    #[error("failed to parse scenario: {source}")]
    ScenarioYaml {
        /// The underlying YAML error.
        #[from]
        source: serde_yml::Error,
    },

    /// The scenario parsed but is inconsistent.
    #[error("invalid scenario: {message}")]
    Scenario {
        /// Description of the problem.
        message: String,
    },

    /// The logger did not reach the started state.
    #[error("logger did not start, state is {state}")]
    NotStarted {
        /// Lifecycle state the logger was left in.
        state: String,
    },

    /// The tracing subscriber could not be installed.
    #[error("logging setup failed: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_started_names_the_state() {
        let err = EngineError::NotStarted {
            state: "Uninit".to_owned(),
        };
        assert_eq!(err.to_string(), "logger did not start, state is Uninit");
    }
}
