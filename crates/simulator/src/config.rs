//! Harness configuration.

use pdes_kernel::KernelConfig;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Errors from loading a harness configuration.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Full harness configuration: a `[kernel]` table and a `[workload]` table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    pub kernel: KernelConfig,
    pub workload: WorkloadConfig,
}

impl SimulatorConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, LoadError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

/// Synthetic cohort parameters.
///
/// Every patient starts well, may fall sick, and then either recovers or
/// dies. Recovered patients may relapse into the well state and start over.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub patients: usize,
    pub seed: u64,
    /// Delays between transitions are drawn from `1..=max_delay`.
    pub max_delay: u64,
    /// Chance a well patient falls sick at each check.
    pub sick_probability: f64,
    /// Chance a sick patient dies instead of recovering.
    pub fatality: f64,
    /// Chance a recovered patient becomes susceptible again.
    pub relapse: f64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            patients: 1_000,
            seed: 42,
            max_delay: 12,
            sick_probability: 0.3,
            fatality: 0.05,
            relapse: 0.5,
        }
    }
}

impl WorkloadConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_delay == 0 {
            return Err("max_delay must be at least 1".to_string());
        }
        for (name, p) in [
            ("sick_probability", self.sick_probability),
            ("fatality", self.fatality),
            ("relapse", self.relapse),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("{name} must be within [0, 1], got {p}"));
            }
        }
        Ok(())
    }
}
