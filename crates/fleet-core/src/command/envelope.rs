//! Command channel wire format
//!
//! Dashboard-issued commands travel to devices as JSON envelopes over the
//! per-user broadcast channel; devices answer commands routed through the
//! reliable queue with acknowledgement envelopes. The wire shapes here are
//! the only formats this crate speaks - transport is an external
//! collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::DeviceId;

/// A dashboard command addressed to one device
///
/// Serializes as `{"commandId": …, "deviceId": …, "command": …, "data": …,
/// "timestamp": …}`.
///
/// # Examples
///
/// ```
/// use outdial_fleet_core::command::{CommandEnvelope, DeviceCommand};
/// use outdial_fleet_core::DeviceId;
///
/// let envelope = CommandEnvelope::new(
///     DeviceId::from("device-7"),
///     DeviceCommand::MakeCall { number: "+15550001".into() },
/// );
/// let json = serde_json::to_string(&envelope).unwrap();
/// assert!(json.contains("\"command\":\"make_call\""));
/// assert!(json.contains("\"deviceId\":\"device-7\""));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    /// Correlation id echoed back in the acknowledgement
    pub command_id: String,
    /// Target device
    pub device_id: DeviceId,
    /// Command verb and payload
    #[serde(flatten)]
    pub command: DeviceCommand,
    /// Issue time at the dashboard
    pub timestamp: DateTime<Utc>,
}

impl CommandEnvelope {
    /// Build an envelope with a fresh correlation id and current timestamp
    pub fn new(device_id: DeviceId, command: DeviceCommand) -> Self {
        Self {
            command_id: format!("cmd-{}", uuid::Uuid::new_v4()),
            device_id,
            command,
            timestamp: Utc::now(),
        }
    }
}

/// Command vocabulary understood by devices
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "command", content = "data", rename_all = "snake_case")]
pub enum DeviceCommand {
    /// Place a single manual call
    MakeCall { number: String },
    /// Begin a bulk dialing campaign over the supplied numbers
    StartCampaign {
        numbers: Vec<String>,
        list_id: String,
        list_name: String,
    },
    /// Terminate one active call by native handle
    EndCall { handle: String },
    /// Stop the running campaign and sweep its records
    StopCampaign,
    /// Unpair this device; terminal for the device record
    Unpair,
    /// Mute or unmute an active call
    MuteCall { handle: String, muted: bool },
    /// Answer an incoming call
    AnswerCall { handle: String },
}

impl DeviceCommand {
    /// Wire name of the command verb
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::MakeCall { .. } => "make_call",
            DeviceCommand::StartCampaign { .. } => "start_campaign",
            DeviceCommand::EndCall { .. } => "end_call",
            DeviceCommand::StopCampaign => "stop_campaign",
            DeviceCommand::Unpair => "unpair",
            DeviceCommand::MuteCall { .. } => "mute_call",
            DeviceCommand::AnswerCall { .. } => "answer_call",
        }
    }
}

/// Delivery/processing state reported in an acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// Transport delivered the command to the device
    Received,
    /// Device executed the command
    Processed,
    /// Device rejected or failed to execute the command
    Failed,
}

/// Acknowledgement envelope for commands routed through the reliable queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAck {
    pub command_id: String,
    pub device_id: DeviceId,
    pub status: AckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandAck {
    pub fn processed(command_id: impl Into<String>, device_id: DeviceId) -> Self {
        Self {
            command_id: command_id.into(),
            device_id,
            status: AckStatus::Processed,
            error: None,
        }
    }

    pub fn failed(
        command_id: impl Into<String>,
        device_id: DeviceId,
        error: impl Into<String>,
    ) -> Self {
        Self {
            command_id: command_id.into(),
            device_id,
            status: AckStatus::Failed,
            error: Some(error.into()),
        }
    }
}
