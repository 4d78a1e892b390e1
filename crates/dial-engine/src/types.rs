//! Core call types
//!
//! Durable call records, the canonical status taxonomy, and the ephemeral
//! native handle newtype. The native handle is owned by the platform
//! telephony stack and recycled after call termination; the durable
//! [`CallId`] survives process restarts and is the identity everything else
//! keys on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use outdial_fleet_core::DeviceId;

/// Durable call record identifier, generated at record creation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallId(pub String);

impl CallId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ephemeral, device-local call identifier assigned by the telephony stack
///
/// Handles are recycled after a call terminates, so a handle is only
/// meaningful while its mapping in the [`crate::mapper::HandleMapper`] is
/// alive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeHandle(pub String);

impl NativeHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NativeHandle {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Canonical call status taxonomy
///
/// `queued → dialing → ringing → answered → ended`. `Ended` is terminal and
/// is also the landing state for busy/failed/no-answer/rejected/unreachable
/// outcomes. Once a record is `Ended` no further transition is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    /// Record created, dial not yet attempted
    Queued,
    /// Native dial issued
    Dialing,
    /// Remote side alerting
    Ringing,
    /// Call connected
    Answered,
    /// Call finished; terminal
    Ended,
}

impl CallStatus {
    /// Whether this status accepts no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Ended)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Queued => "queued",
            CallStatus::Dialing => "dialing",
            CallStatus::Ringing => "ringing",
            CallStatus::Answered => "answered",
            CallStatus::Ended => "ended",
        }
    }

    /// Parse a canonical status string (as persisted by the call store)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(CallStatus::Queued),
            "dialing" => Some(CallStatus::Dialing),
            "ringing" => Some(CallStatus::Ringing),
            "answered" => Some(CallStatus::Answered),
            "ended" => Some(CallStatus::Ended),
            _ => None,
        }
    }
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable call record
///
/// Created by the dashboard (manual call) or by the campaign orchestrator
/// (one per number, `Queued`, before any dial attempt). Status and duration
/// are mutated only by the reconciler; `hidden` only by explicit user
/// action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub id: CallId,
    /// Dialed number, possibly already carrying a dial prefix
    pub number: String,
    pub status: CallStatus,
    /// Owning device; None until assigned
    pub device_id: Option<DeviceId>,
    /// Record creation time
    pub start_time: DateTime<Utc>,
    /// First transition into `Answered`; basis for duration computation
    pub answered_at: Option<DateTime<Utc>>,
    /// Whole seconds, set only on terminal status and only if the call was
    /// actually answered
    pub duration_seconds: u64,
    /// Soft-delete flag for history views
    pub hidden: bool,
    /// Grouping key for bulk operations
    pub campaign_id: Option<String>,
    /// Secondary grouping key (campaign session)
    pub session_id: Option<String>,
}

impl CallRecord {
    /// New record in `Queued` status with a generated id
    pub fn queued(number: impl Into<String>, device_id: Option<DeviceId>) -> Self {
        Self {
            id: CallId::new(),
            number: number.into(),
            status: CallStatus::Queued,
            device_id,
            start_time: Utc::now(),
            answered_at: None,
            duration_seconds: 0,
            hidden: false,
            campaign_id: None,
            session_id: None,
        }
    }

    /// Tag this record as belonging to a campaign batch
    pub fn with_campaign(mut self, campaign_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self.session_id = Some(session_id.into());
        self
    }
}

/// Observable progress of a running campaign
///
/// Republished unmodified from the native batch dialer's progress callback;
/// the native layer, not the orchestrator, is the source of truth for
/// whether dialing is actually happening.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub total_numbers: usize,
    pub completed_numbers: usize,
    pub active_calls_count: usize,
    /// Numbers currently ringing or connecting, for UI feedback
    pub dialing_numbers: HashSet<String>,
    /// Display flag only; forwarded to/from the native layer
    pub paused: bool,
}

/// Final summary reported when a campaign completes or is stopped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub campaign_id: String,
    pub total_attempts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ended_is_the_only_terminal_status() {
        for status in [
            CallStatus::Queued,
            CallStatus::Dialing,
            CallStatus::Ringing,
            CallStatus::Answered,
        ] {
            assert!(!status.is_terminal());
        }
        assert!(CallStatus::Ended.is_terminal());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            CallStatus::Queued,
            CallStatus::Dialing,
            CallStatus::Ringing,
            CallStatus::Answered,
            CallStatus::Ended,
        ] {
            assert_eq!(CallStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CallStatus::parse("bogus"), None);
    }

    #[test]
    fn queued_record_starts_clean() {
        let record = CallRecord::queued("+15550000", None)
            .with_campaign("camp-1", "sess-1");
        assert_eq!(record.status, CallStatus::Queued);
        assert_eq!(record.duration_seconds, 0);
        assert!(record.answered_at.is_none());
        assert_eq!(record.campaign_id.as_deref(), Some("camp-1"));
    }
}
