//! Miner configuration.

use serde::{Deserialize, Serialize};

/// Longest delay between two scheduler dispatches, in milliseconds.
///
/// The actual delay is `throttle * MAX_TIMEOUT_INTERVAL_MS`; a throttle of
/// zero dispatches on the next event-loop turn.
pub const MAX_TIMEOUT_INTERVAL_MS: u64 = 1000;

/// Configuration for [`FsMiner`](crate::FsMiner).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
  /// Number of files that can be concurrently handed to the extractor.
  /// Clamped to a minimum of 1.
  pub pool_limit: usize,
  /// Initial indexing speed modifier, 0 is max speed, 1 is slowest.
  /// Clamped to `[0, 1]`.
  pub throttle: f64,
  /// Capacity of the miner's control/event inbox.
  pub event_capacity: usize,
  /// Capacity of the channel bridging filesystem notifications into the
  /// monitor task.
  pub monitor_capacity: usize,
  /// Minimum seconds between two progress reports.
  pub progress_interval_secs: u64,
  /// Seconds to wait for in-flight jobs to finish on shutdown before they
  /// are abandoned.
  pub shutdown_grace_secs: u64,
}

impl Default for MinerConfig {
  fn default() -> Self {
    Self {
      pool_limit: 1,
      throttle: 0.0,
      event_capacity: 256,
      monitor_capacity: 256,
      progress_interval_secs: 1,
      shutdown_grace_secs: 5,
    }
  }
}

impl MinerConfig {
  /// Pool limit with the minimum of 1 enforced.
  pub fn effective_pool_limit(&self) -> usize {
    self.pool_limit.max(1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_config_defaults() {
    let config = MinerConfig::default();
    assert_eq!(config.pool_limit, 1);
    assert_eq!(config.throttle, 0.0);
    assert_eq!(config.event_capacity, 256);
    assert_eq!(config.shutdown_grace_secs, 5);
  }

  #[test]
  fn test_pool_limit_minimum() {
    let config = MinerConfig {
      pool_limit: 0,
      ..Default::default()
    };
    assert_eq!(config.effective_pool_limit(), 1);
  }
}
