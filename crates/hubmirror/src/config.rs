//! Engine configuration.

use std::time::Duration;

use crate::gateway::DEFAULT_RPS;

/// Tunables for the sync engine.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Cycle timer period for each active agent.
    pub poll_period: Duration,
    /// Idle window after which an agent deactivates. Three poll periods by
    /// default: interest refreshes it, a pending force defers it.
    pub idle_after: Duration,
    /// Wall-clock budget for refreshing one sub-resource; an overrun fails
    /// that sub-resource only and the timer keeps its cadence.
    pub sub_resource_timeout: Duration,
    /// Entries per delta-sync page.
    pub page_size: usize,
    /// Token-bucket rate per upstream credential.
    pub requests_per_second: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let poll_period = Duration::from_secs(60);
        Self {
            poll_period,
            idle_after: poll_period * 3,
            sub_resource_timeout: Duration::from_secs(30),
            page_size: 1000,
            requests_per_second: DEFAULT_RPS,
        }
    }
}

impl SyncConfig {
    /// A config with the given poll period and the idle window derived from
    /// it.
    pub fn with_poll_period(poll_period: Duration) -> Self {
        Self {
            poll_period,
            idle_after: poll_period * 3,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_window_is_three_poll_periods() {
        let config = SyncConfig::default();
        assert_eq!(config.idle_after, config.poll_period * 3);

        let fast = SyncConfig::with_poll_period(Duration::from_millis(100));
        assert_eq!(fast.idle_after, Duration::from_millis(300));
    }
}
