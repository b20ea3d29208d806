//! Test scenario files
//!
//! A scenario names a command sequence and, optionally, the target and
//! timing it should run with. Command-line flags override every field.

use std::path::Path;

use serde::Deserialize;

use crate::common::config::ErrorPolicy;
use crate::common::{Error, Result};

/// A test scenario loaded from a YAML file
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TestScenario {
    /// Name of the test scenario
    pub name: String,
    /// Optional description of what the scenario exercises
    pub description: Option<String>,
    /// Resource address to run against
    pub target: Option<String>,
    /// Commands executed on every pass
    pub commands: Vec<String>,
    /// Pause after writes, in milliseconds
    pub write_delay_ms: Option<u64>,
    pub on_error: Option<ErrorPolicy>,
    /// Seconds to keep running passes after connecting
    pub query_repeat_secs: Option<f64>,
    /// Seconds to keep repeating the connect lifecycle
    pub connect_repeat_secs: Option<f64>,
    /// I/O timeout in milliseconds
    pub timeout_ms: Option<u64>,
}

impl TestScenario {
    /// Load a scenario from `path`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content).map_err(|e| match e {
            Error::ConfigParse(message) => {
                Error::ConfigParse(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    /// Parse a scenario from YAML text
    pub fn parse(content: &str) -> Result<Self> {
        let scenario: Self =
            serde_yaml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;

        if scenario.commands.iter().all(|c| c.trim().is_empty()) {
            return Err(Error::Config(format!(
                "scenario '{}' has no commands",
                scenario.name
            )));
        }
        for (field, value) in [
            ("query_repeat_secs", scenario.query_repeat_secs),
            ("connect_repeat_secs", scenario.connect_repeat_secs),
        ] {
            if value.is_some_and(|v| !v.is_finite() || v < 0.0) {
                return Err(Error::Config(format!(
                    "scenario '{}': {} must be a non-negative number",
                    scenario.name, field
                )));
            }
        }

        Ok(scenario)
    }
}
