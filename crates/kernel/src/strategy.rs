//! Dispatch strategy selection.

use crate::{ConfigError, KernelConfig};
use pdes_dispatch::Dispatch;
use pdes_dispatch_pooled::{PoolConfig, PoolConfigBuilder, PooledDispatch};
use pdes_dispatch_semaphore::{SemaphoreConfig, SemaphoreDispatch};
use pdes_dispatch_slots::{SlotConfig, SlotDispatch};
use pdes_dispatch_sync::SyncDispatch;
use serde::Deserialize;
use std::fmt;

/// How the events of a tick are handed to workers.
///
/// Every strategy runs the same driving loop and produces the same set of
/// executed events for the same workload; they differ only in overhead.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// No worker threads. Events run on the driver thread while it waits
    /// for quiescence.
    Sequential,
    /// Rayon pool, one job per event, blocking barrier.
    #[default]
    Standard,
    /// Rayon pool, one job per event, spinning barrier, per-worker buffers.
    Quick,
    /// Rayon pool, `bunch_size` events per job, spinning barrier,
    /// per-worker buffers.
    Bunch,
    /// Dedicated threads with double-buffered input slots, per-worker buffers.
    Buffered,
    /// Dedicated threads bounded by a semaphore; idle workers advance the
    /// clock.
    Dist,
}

impl Strategy {
    pub const ALL: [Strategy; 6] = [
        Strategy::Sequential,
        Strategy::Standard,
        Strategy::Quick,
        Strategy::Bunch,
        Strategy::Buffered,
        Strategy::Dist,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::Standard => "standard",
            Strategy::Quick => "quick",
            Strategy::Bunch => "bunch",
            Strategy::Buffered => "buffered",
            Strategy::Dist => "dist",
        }
    }

    /// Whether future events submitted by a worker go to its private buffer
    /// instead of the shared future set.
    pub fn uses_worker_buffers(self) -> bool {
        matches!(self, Strategy::Quick | Strategy::Bunch | Strategy::Buffered)
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.name() == s)
            .ok_or_else(|| format!("unknown strategy: {s}"))
    }
}

/// Build the dispatcher for a validated configuration.
pub(crate) fn build_dispatch(config: &KernelConfig) -> Result<Box<dyn Dispatch>, ConfigError> {
    let workers = config.resolved_workers();
    let pool = |builder: PoolConfigBuilder| -> Result<Box<dyn Dispatch>, ConfigError> {
        let pool_config = builder
            .threads(workers)
            .build()
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        let dispatch =
            PooledDispatch::new(pool_config).map_err(|e| ConfigError::PoolBuild(e.to_string()))?;
        Ok(Box::new(dispatch))
    };

    match config.effective_strategy() {
        Strategy::Sequential => Ok(Box::new(SyncDispatch::new())),
        Strategy::Standard => pool(PoolConfig::builder()),
        Strategy::Quick => pool(PoolConfig::builder().spin(config.wait)),
        Strategy::Bunch => pool(
            PoolConfig::builder()
                .spin(config.wait)
                .bunch_size(config.bunch_size),
        ),
        Strategy::Buffered => {
            let dispatch = SlotDispatch::new(SlotConfig::with_workers(workers).wait(config.wait))
                .map_err(|e| ConfigError::PoolBuild(e.to_string()))?;
            Ok(Box::new(dispatch))
        }
        Strategy::Dist => {
            let permits = if config.permits == 0 {
                workers
            } else {
                config.permits
            };
            let dispatch =
                SemaphoreDispatch::new(SemaphoreConfig::with_workers(workers).permits(permits))
                    .map_err(|e| ConfigError::PoolBuild(e.to_string()))?;
            Ok(Box::new(dispatch))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_names() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.name().parse::<Strategy>(), Ok(strategy));
        }
        assert!("custom".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_buffered_strategies() {
        let buffered: Vec<_> = Strategy::ALL
            .into_iter()
            .filter(|s| s.uses_worker_buffers())
            .collect();
        assert_eq!(
            buffered,
            vec![Strategy::Quick, Strategy::Bunch, Strategy::Buffered]
        );
    }

    #[test]
    fn test_dispatch_names_match_strategy() {
        for strategy in Strategy::ALL {
            let config = KernelConfig::builder()
                .strategy(strategy)
                .workers(2)
                .bunch_size(4)
                .build()
                .unwrap();
            let dispatch = build_dispatch(&config).unwrap();
            assert_eq!(dispatch.name(), strategy.name());
            dispatch.shutdown();
        }
    }

    #[test]
    fn test_single_worker_is_sequential() {
        let config = KernelConfig::builder()
            .strategy(Strategy::Dist)
            .workers(1)
            .build()
            .unwrap();
        assert_eq!(build_dispatch(&config).unwrap().name(), "sequential");
    }
}
