//! Native telephony boundary
//!
//! The platform telephony stack is an external collaborator. This module
//! defines the trait the engine drives it through and the event shapes it
//! delivers back. State-change events reach the engine over three
//! independent channels - the native callback itself, the peer-to-peer
//! broadcast rebroadcast, and the periodic poll fallback - as a defense
//! against any single channel silently failing. The reconciler's
//! idempotence is what makes that duplication safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;
use crate::types::{CampaignProgress, CampaignSummary, NativeHandle};

/// Which channel delivered a state event; used for diagnostics only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// The native telephony callback on the device itself
    NativeCallback,
    /// Rebroadcast over the peer-to-peer channel
    Broadcast,
    /// Periodic polling fallback
    Poll,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventSource::NativeCallback => "native_callback",
            EventSource::Broadcast => "broadcast",
            EventSource::Poll => "poll",
        };
        f.write_str(s)
    }
}

/// A call state transition reported by the telephony layer
///
/// `state` carries the native vocabulary verbatim (case-insensitive);
/// folding into the canonical taxonomy happens in the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallStateEvent {
    pub handle: NativeHandle,
    pub number: String,
    /// Native state string, e.g. `RINGING`, `ACTIVE`, `DISCONNECTED`, `BUSY`
    pub state: String,
    pub source: EventSource,
    /// When the transition occurred (sender's clock)
    pub timestamp: DateTime<Utc>,
}

impl CallStateEvent {
    pub fn new(
        handle: NativeHandle,
        number: impl Into<String>,
        state: impl Into<String>,
        source: EventSource,
    ) -> Self {
        Self {
            handle,
            number: number.into(),
            state: state.into(),
            source,
            timestamp: Utc::now(),
        }
    }
}

/// One entry from the native layer's active-call snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveCallInfo {
    pub handle: NativeHandle,
    pub number: String,
    pub state: String,
}

/// Progress callback payload from the native batch dialer
pub type CampaignProgressEvent = CampaignProgress;

/// Completion callback payload from the native batch dialer
pub type CampaignCompletedEvent = CampaignSummary;

/// Contract the engine drives the platform telephony stack through
///
/// Single-call primitives plus the batch-dialer controls. Every method is a
/// thin pass-through on the device side; no business logic lives behind
/// this trait.
#[async_trait]
pub trait NativeTelephony: Send + Sync {
    /// Place one native call; returns the ephemeral handle
    async fn start_call(&self, number: &str) -> Result<NativeHandle>;

    /// Terminate one native call
    async fn end_call(&self, handle: &NativeHandle) -> Result<()>;

    /// Snapshot of currently active native calls (poll fallback source)
    async fn get_active_calls(&self) -> Result<Vec<ActiveCallInfo>>;

    /// Merge all active calls into a conference; returns the conference id
    async fn merge_active_calls(&self) -> Result<String>;

    /// Mute or unmute one active call
    async fn mute_call(&self, handle: &NativeHandle, muted: bool) -> Result<()>;

    /// Answer an incoming call
    async fn answer_call(&self, handle: &NativeHandle) -> Result<()>;

    /// Hand the full number list to the native batch dialer
    async fn start_campaign(&self, numbers: &[String]) -> Result<()>;

    /// Pause the native batch dialer
    async fn pause_campaign(&self) -> Result<()>;

    /// Resume the native batch dialer
    async fn resume_campaign(&self) -> Result<()>;

    /// Stop the native batch dialer
    ///
    /// Does not guarantee a terminal event per in-flight call; the
    /// orchestrator's stop sweep covers the gap.
    async fn stop_campaign(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_source_serializes_snake_case() {
        let json = serde_json::to_string(&EventSource::NativeCallback).unwrap();
        assert_eq!(json, "\"native_callback\"");
    }

    #[test]
    fn state_event_carries_native_vocabulary_verbatim() {
        let event = CallStateEvent::new(
            NativeHandle::from("call-1"),
            "+15550000",
            "DISCONNECTED",
            EventSource::Broadcast,
        );
        assert_eq!(event.state, "DISCONNECTED");
    }
}
