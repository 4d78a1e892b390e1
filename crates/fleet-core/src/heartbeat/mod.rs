//! Bidirectional heartbeat and liveness monitoring
//!
//! The dashboard pings every device it believes is online over the per-user
//! broadcast channel; devices answer with pongs that also refresh their
//! persisted `last_seen` timestamp. Failure detection is cross-validated:
//! a device is declared offline only when it has missed enough consecutive
//! pings AND its `last_seen` is stale. Either signal alone is insufficient -
//! a device that misses pings but shows recent passive activity is presumed
//! merely slow on the ping channel, which avoids flapping under transient
//! channel congestion while still catching genuinely dead devices.
//!
//! The monitor's sole side effect on declaration is a status write through
//! the injected [`DeviceStore`]; it never touches call records.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::device::{DeviceId, DeviceStatus};
use crate::error::Result;
use crate::store::DeviceStore;

/// Heartbeat protocol tuning
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping rounds
    pub ping_interval: Duration,
    /// How long to wait for a pong before counting a miss
    pub pong_timeout: Duration,
    /// Consecutive unanswered pings before the miss signal fires
    pub miss_threshold: u32,
    /// Cross-validation window: `last_seen` must be older than this before
    /// the miss signal is allowed to declare the device offline
    pub last_seen_window: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(60),
            pong_timeout: Duration::from_secs(10),
            miss_threshold: 3,
            last_seen_window: Duration::from_secs(5 * 60),
        }
    }
}

/// Ping message sent dashboard → device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ping {
    pub device_id: DeviceId,
    pub timestamp: DateTime<Utc>,
}

/// Pong response device → dashboard, echoing the ping's timestamp
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pong {
    pub device_id: DeviceId,
    pub timestamp: DateTime<Utc>,
    pub original_timestamp: DateTime<Utc>,
}

impl Pong {
    /// Device-side reply to a received ping
    pub fn answering(ping: &Ping) -> Self {
        Self {
            device_id: ping.device_id.clone(),
            timestamp: Utc::now(),
            original_timestamp: ping.timestamp,
        }
    }
}

/// Outbound seam for the broadcast channel used by pings
#[async_trait]
pub trait HeartbeatChannel: Send + Sync {
    async fn send_ping(&self, ping: &Ping) -> Result<()>;
}

/// Per-device ping bookkeeping
#[derive(Debug, Default, Clone)]
struct MissState {
    /// Consecutive unanswered pings
    missed: u32,
    /// Send time of the ping currently awaiting a pong
    outstanding: Option<DateTime<Utc>>,
}

/// Dashboard-side heartbeat monitor
///
/// Drive it either with [`run`] (self-scheduling loop) or by calling
/// [`ping_round`] / [`sweep_timeouts`] from an external scheduler. Pongs
/// arriving from the broadcast channel are fed in through [`handle_pong`].
///
/// [`run`]: HeartbeatMonitor::run
/// [`ping_round`]: HeartbeatMonitor::ping_round
/// [`sweep_timeouts`]: HeartbeatMonitor::sweep_timeouts
/// [`handle_pong`]: HeartbeatMonitor::handle_pong
pub struct HeartbeatMonitor {
    channel: Arc<dyn HeartbeatChannel>,
    store: Arc<dyn DeviceStore>,
    config: HeartbeatConfig,
    state: DashMap<DeviceId, MissState>,
}

impl HeartbeatMonitor {
    pub fn new(
        channel: Arc<dyn HeartbeatChannel>,
        store: Arc<dyn DeviceStore>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            channel,
            store,
            config,
            state: DashMap::new(),
        }
    }

    /// Send a ping to every device currently believed online
    ///
    /// Send failures are logged and skipped; a device whose ping could not
    /// even be sent is not charged a miss for it.
    pub async fn ping_round(&self) -> Result<()> {
        let online = self.store.list_online().await?;
        debug!("💓 Ping round for {} online device(s)", online.len());

        for device in online {
            let ping = Ping {
                device_id: device.id.clone(),
                timestamp: Utc::now(),
            };
            match self.channel.send_ping(&ping).await {
                Ok(()) => {
                    let mut entry = self.state.entry(device.id).or_default();
                    entry.outstanding = Some(ping.timestamp);
                }
                Err(e) => {
                    warn!("💓 Failed to ping device {}: {}", device.id, e);
                }
            }
        }
        Ok(())
    }

    /// Process a pong from the broadcast channel
    ///
    /// A successful pong unconditionally resets the device's miss counter,
    /// regardless of how stale `last_seen` was, and refreshes `last_seen`.
    pub async fn handle_pong(&self, pong: Pong) -> Result<()> {
        if let Some(mut entry) = self.state.get_mut(&pong.device_id) {
            entry.missed = 0;
            entry.outstanding = None;
        }
        debug!("💓 Pong from {}", pong.device_id);
        self.store
            .update_last_seen(&pong.device_id, pong.timestamp)
            .await
    }

    /// Count misses for outstanding pings older than the pong timeout and
    /// declare offline where the cross-validation agrees
    ///
    /// `now` is injected so callers (and tests) control the clock.
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) -> Result<Vec<DeviceId>> {
        let timeout = chrono::Duration::from_std(self.config.pong_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(10));

        let mut candidates = Vec::new();
        for mut entry in self.state.iter_mut() {
            if let Some(sent_at) = entry.outstanding {
                if now - sent_at >= timeout {
                    entry.outstanding = None;
                    entry.missed += 1;
                    debug!(
                        "💔 Device {} missed ping ({} consecutive)",
                        entry.key(),
                        entry.missed
                    );
                    if entry.missed >= self.config.miss_threshold {
                        candidates.push(entry.key().clone());
                    }
                }
            }
        }

        let mut declared = Vec::new();
        for device_id in candidates {
            if self.cross_validate_offline(&device_id, now).await? {
                declared.push(device_id);
            }
        }
        Ok(declared)
    }

    /// Apply the second half of the failure declaration: the miss counter
    /// has fired, now check the passive `last_seen` signal
    async fn cross_validate_offline(
        &self,
        device_id: &DeviceId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let device = match self.store.get(device_id).await? {
            Some(d) => d,
            None => {
                // Device vanished from the store; drop our bookkeeping
                self.state.remove(device_id);
                return Ok(false);
            }
        };

        // Unpaired is terminal and excluded from liveness entirely
        if device.status == DeviceStatus::Unpaired {
            self.state.remove(device_id);
            return Ok(false);
        }

        let window = chrono::Duration::from_std(self.config.last_seen_window)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

        if now - device.last_seen <= window {
            // Fresh passive activity: presumed alive, just slow on the ping
            // channel. Do not reset the counter - the next pong does that.
            debug!(
                "💓 Device {} missed {} pings but last_seen is recent; keeping online",
                device_id, self.config.miss_threshold
            );
            return Ok(false);
        }

        info!(
            "💀 Declaring device {} offline ({}+ missed pings, last_seen stale)",
            device_id, self.config.miss_threshold
        );
        self.store
            .update_status(device_id, DeviceStatus::Offline)
            .await?;
        self.state.remove(device_id);
        Ok(true)
    }

    /// Current consecutive-miss count for a device
    pub fn missed_count(&self, device_id: &DeviceId) -> u32 {
        self.state.get(device_id).map(|s| s.missed).unwrap_or(0)
    }

    /// Self-scheduling monitor loop
    ///
    /// Pings, waits out the pong window, sweeps, then sleeps the remainder
    /// of the interval. Errors are logged and the loop continues.
    pub async fn run(self: Arc<Self>) {
        loop {
            if let Err(e) = self.ping_round().await {
                warn!("💓 Ping round failed: {}", e);
            }
            tokio::time::sleep(self.config.pong_timeout).await;
            match self.sweep_timeouts(Utc::now()).await {
                Ok(declared) if !declared.is_empty() => {
                    info!("💀 Declared {} device(s) offline", declared.len());
                }
                Ok(_) => {}
                Err(e) => warn!("💓 Timeout sweep failed: {}", e),
            }
            let remainder = self
                .config
                .ping_interval
                .saturating_sub(self.config.pong_timeout);
            tokio::time::sleep(remainder).await;
        }
    }
}
