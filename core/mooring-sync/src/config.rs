use mooring_recovery::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Failed replays after which an action is abandoned.
    pub max_retry_count: u32,
    /// Backoff applied to each replay within a pass.
    pub replay_policy: RetryPolicy,
    /// Interval between periodic passes while online (ms).
    pub sync_interval_ms: u64,
    /// Interval between connectivity probes (ms).
    pub probe_interval_ms: u64,
    /// Lifetime of cached snapshots (ms). `None` keeps them forever.
    pub cache_ttl_ms: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retry_count: 5,
            replay_policy: RetryPolicy {
                max_retries: 2,
                initial_delay: Duration::from_millis(500),
                backoff_factor: 2.0,
                max_delay: Duration::from_secs(5),
                jitter: false,
            },
            sync_interval_ms: 30_000,
            probe_interval_ms: 15_000,
            cache_ttl_ms: None,
        }
    }
}

impl SyncConfig {
    // Zero-length tokio intervals panic, so both are floored at 1ms.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.max(1))
    }

    pub fn cache_ttl(&self) -> Option<chrono::Duration> {
        self.cache_ttl_ms
            .and_then(|ms| i64::try_from(ms).ok())
            .map(chrono::Duration::milliseconds)
    }
}
