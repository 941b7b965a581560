//! Kernel configuration.

use crate::Strategy;
use pdes_core::{FutureSetKind, SimTime};
use pdes_dispatch::WaitStrategy;
use serde::Deserialize;
use std::num::NonZeroUsize;
use thiserror::Error;

/// Errors from kernel configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to start workers: {0}")]
    PoolBuild(String),
}

/// Configuration for a [`LogicalProcess`](crate::LogicalProcess).
///
/// Deserializable so the harness can read it from the `[kernel]` table of a
/// TOML file; missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// How tick events are handed to workers.
    pub strategy: Strategy,

    /// Worker count. `0` means one per available core; `1` forces the
    /// sequential strategy.
    pub workers: usize,

    /// Default horizon (`maxgvt`) used by [`run`](crate::LogicalProcess::run).
    pub horizon: SimTime,

    /// Initial value of the clock.
    pub start_time: SimTime,

    /// Future event set representation.
    pub future_set: FutureSetKind,

    /// How spinning strategies wait.
    pub wait: WaitStrategy,

    /// Events per job for the bunch strategy.
    pub bunch_size: usize,

    /// Concurrent events for the dist strategy. `0` means one per worker.
    pub permits: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            workers: 0,
            horizon: SimTime::new(1_000),
            start_time: SimTime::ZERO,
            future_set: FutureSetKind::default(),
            wait: WaitStrategy::default(),
            bunch_size: 64,
            permits: 0,
        }
    }
}

impl KernelConfig {
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::new()
    }

    /// Single-threaded baseline configuration.
    pub fn sequential(horizon: u64) -> Self {
        Self {
            strategy: Strategy::Sequential,
            workers: 1,
            horizon: SimTime::new(horizon),
            ..Self::default()
        }
    }

    /// Worker count after resolving `0` to the available parallelism.
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(4)
        } else {
            self.workers
        }
    }

    /// The strategy that will actually run. A single worker is always
    /// sequential.
    pub fn effective_strategy(&self) -> Strategy {
        if self.resolved_workers() == 1 {
            Strategy::Sequential
        } else {
            self.strategy
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon < self.start_time {
            return Err(ConfigError::InvalidConfig(format!(
                "horizon {} is before start_time {}",
                self.horizon, self.start_time
            )));
        }
        if self.bunch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "bunch_size must be at least 1".to_string(),
            ));
        }
        if self.strategy == Strategy::Bunch && self.bunch_size < 2 {
            return Err(ConfigError::InvalidConfig(
                "bunch strategy needs bunch_size of at least 2".to_string(),
            ));
        }
        if self.permits > self.resolved_workers() {
            return Err(ConfigError::InvalidConfig(format!(
                "permits ({}) exceed workers ({})",
                self.permits,
                self.resolved_workers()
            )));
        }
        Ok(())
    }
}

/// Builder for KernelConfig.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    pub fn horizon(mut self, horizon: u64) -> Self {
        self.config.horizon = SimTime::new(horizon);
        self
    }

    pub fn start_time(mut self, start_time: u64) -> Self {
        self.config.start_time = SimTime::new(start_time);
        self
    }

    pub fn future_set(mut self, kind: FutureSetKind) -> Self {
        self.config.future_set = kind;
        self
    }

    pub fn wait(mut self, wait: WaitStrategy) -> Self {
        self.config.wait = wait;
        self
    }

    pub fn bunch_size(mut self, size: usize) -> Self {
        self.config.bunch_size = size;
        self
    }

    pub fn permits(mut self, permits: usize) -> Self {
        self.config.permits = permits;
        self
    }

    /// Build the configuration, validating it first.
    pub fn build(self) -> Result<KernelConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build the configuration without validation.
    pub fn build_unchecked(self) -> KernelConfig {
        self.config
    }
}
