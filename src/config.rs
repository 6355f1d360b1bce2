use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::outlier::Confidence;
use crate::Result;

/// Run-time settings
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub timelag: TimelagSettings,
    pub solver: SolverSettings,
    pub outlier: OutlierSettings,
}

impl Config {
    /// Parse a configuration from TOML
    ///
    /// # Errors
    /// Returns an error if `contents` is not valid TOML or has fields of the wrong type.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Read a configuration from a TOML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(format!("config file {} not found", path.display()).into());
        }
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

/// How closure windows are trimmed and which residuals enter the lag cost
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelagSettings {
    /// Seconds excluded at the start of every window
    pub left_margin: f64,
    /// Seconds excluded at the end of every window
    pub right_margin: f64,
    /// Evaluate residuals over the closure window only
    pub closure_only: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    /// Absolute tolerance on the lag for the bounded search
    pub bounded_tolerance: f64,
    /// Tolerance on the spread of simplex costs for the unbounded search
    pub unbounded_tolerance: f64,
    /// Tolerance on the spread of simplex vertices for the unbounded search
    pub unbounded_param_tolerance: f64,
    pub bounded_max_iters: u64,
    pub unbounded_max_iters: u64,
    /// Attach a terminal logger to the solver which reports every iteration
    pub trace_solver: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            bounded_tolerance: 1e-6,
            unbounded_tolerance: 1e-6,
            unbounded_param_tolerance: 1e-6,
            bounded_max_iters: 500,
            unbounded_max_iters: 200,
            trace_solver: false,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierSettings {
    pub confidence: Confidence,
}
