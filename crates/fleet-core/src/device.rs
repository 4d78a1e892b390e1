//! Device identity and pairing state
//!
//! A device is a paired mobile handset that places native calls on behalf of
//! the dashboard. This module defines the durable device record and its
//! status lattice. `Unpaired` is terminal: an unpaired device is excluded
//! from all liveness and queue logic and is treated as deleted for
//! orchestration purposes even if the record is retained for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a paired device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Pairing and reachability status of a device
///
/// Transitions:
/// - `Online ⇄ Offline` driven by the heartbeat monitor
/// - `* → Unpaired` only via explicit user action from either end; terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Device is paired and believed reachable
    Online,
    /// Device is paired but failed cross-validated liveness checks
    Offline,
    /// Device was explicitly unpaired; terminal
    Unpaired,
}

impl DeviceStatus {
    /// Whether this status permits liveness monitoring and queue activity
    pub fn is_orchestratable(&self) -> bool {
        !matches!(self, DeviceStatus::Unpaired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Online => "online",
            DeviceStatus::Offline => "offline",
            DeviceStatus::Unpaired => "unpaired",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable device record
///
/// `active_calls_count` is a reconciled, debounced projection of the device's
/// admitted call set, written through the coalescing writer in
/// [`crate::counter`] - it is not a live counter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub status: DeviceStatus,
    /// Timestamp of the last confirmed liveness signal (pong or passive
    /// heartbeat refresh from the device itself)
    pub last_seen: DateTime<Utc>,
    /// Denormalized count of currently admitted calls
    pub active_calls_count: u32,
}

impl Device {
    /// Create a freshly paired device, online with a current liveness stamp
    pub fn paired(id: DeviceId) -> Self {
        Self {
            id,
            status: DeviceStatus::Online,
            last_seen: Utc::now(),
            active_calls_count: 0,
        }
    }
}
