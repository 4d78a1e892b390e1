use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DialEngineError, Result};

/// Dial engine configuration
///
/// Encompasses the tunable behavior of the per-device orchestration core:
/// queue admission, campaign control, and the projection writer.
///
/// # Examples
///
/// ```
/// use outdial_dial_engine::config::DialEngineConfig;
///
/// let config = DialEngineConfig::default();
/// assert_eq!(config.queue.max_concurrent_calls, 6);
/// config.validate().expect("defaults are valid");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DialEngineConfig {
    /// Queue admission behavior
    pub queue: QueueConfig,
    /// Campaign orchestration behavior
    pub campaign: CampaignConfig,
    /// Denormalized projection writes
    pub projection: ProjectionConfig,
}

/// Call queue admission configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum concurrently admitted native calls per device
    pub max_concurrent_calls: usize,
    /// Debounce applied to admission triggers to coalesce bursts
    pub admit_debounce: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 6,
            admit_debounce: Duration::from_millis(100),
        }
    }
}

/// Campaign orchestration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Total budget for the reconciliation-listener readiness poll before a
    /// start is failed back to the caller
    pub readiness_timeout: Duration,
    /// Interval between readiness checks
    pub readiness_poll_interval: Duration,
    /// Settle delay after native stop, allowing in-flight disconnect events
    /// to land before the defensive sweep
    pub stop_settle: Duration,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            readiness_timeout: Duration::from_secs(10),
            readiness_poll_interval: Duration::from_millis(250),
            stop_settle: Duration::from_secs(2),
        }
    }
}

/// Projection writer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionConfig {
    /// Coalescing window for `active_calls_count` writes
    pub coalesce_window: Duration,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            coalesce_window: Duration::from_millis(300),
        }
    }
}

impl DialEngineConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `DialEngineError::Configuration` for values that would make
    /// the engine inert (zero concurrency, zero readiness budget).
    pub fn validate(&self) -> Result<()> {
        if self.queue.max_concurrent_calls == 0 {
            return Err(DialEngineError::configuration(
                "queue.max_concurrent_calls must be at least 1",
            ));
        }
        if self.campaign.readiness_timeout.is_zero() {
            return Err(DialEngineError::configuration(
                "campaign.readiness_timeout must be non-zero",
            ));
        }
        if self.campaign.readiness_poll_interval > self.campaign.readiness_timeout {
            return Err(DialEngineError::configuration(
                "campaign.readiness_poll_interval exceeds readiness_timeout",
            ));
        }
        Ok(())
    }
}
