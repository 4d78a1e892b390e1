//! Device store trait and in-memory implementation
//!
//! The orchestration core only needs a handful of device operations: read a
//! record, update its status, refresh its liveness stamp, and write the
//! denormalized active-calls projection. Everything else (pairing flows,
//! audit retention) belongs to the external persistence collaborator, so the
//! trait is deliberately narrow.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::device::{Device, DeviceId, DeviceStatus};
use crate::error::{FleetError, Result};

/// Minimal persistence contract for device records
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Fetch a device record by id
    async fn get(&self, id: &DeviceId) -> Result<Option<Device>>;

    /// Insert or replace a device record
    async fn upsert(&self, device: Device) -> Result<()>;

    /// Update a device's status
    ///
    /// Updating an `Unpaired` device is rejected: unpairing is terminal.
    async fn update_status(&self, id: &DeviceId, status: DeviceStatus) -> Result<()>;

    /// Refresh the last confirmed liveness timestamp
    async fn update_last_seen(&self, id: &DeviceId, at: DateTime<Utc>) -> Result<()>;

    /// Write the denormalized active-calls projection
    async fn update_active_calls(&self, id: &DeviceId, count: u32) -> Result<()>;

    /// List devices the dashboard currently believes are online
    async fn list_online(&self) -> Result<Vec<Device>>;
}

/// In-memory device store backed by a concurrent map
///
/// Used by tests and by deployments where device records are mirrored from
/// an external source of truth.
#[derive(Default)]
pub struct InMemoryDeviceStore {
    devices: DashMap<DeviceId, Device>,
}

impl InMemoryDeviceStore {
    pub fn new() -> Self {
        Self {
            devices: DashMap::new(),
        }
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn get(&self, id: &DeviceId) -> Result<Option<Device>> {
        Ok(self.devices.get(id).map(|d| d.clone()))
    }

    async fn upsert(&self, device: Device) -> Result<()> {
        self.devices.insert(device.id.clone(), device);
        Ok(())
    }

    async fn update_status(&self, id: &DeviceId, status: DeviceStatus) -> Result<()> {
        let mut entry = self
            .devices
            .get_mut(id)
            .ok_or_else(|| FleetError::not_found(format!("Device not found: {}", id)))?;
        if entry.status == DeviceStatus::Unpaired {
            return Err(FleetError::invalid_input(format!(
                "Device {} is unpaired; status is terminal",
                id
            )));
        }
        entry.status = status;
        debug!("Device {} status updated to {}", id, status);
        Ok(())
    }

    async fn update_last_seen(&self, id: &DeviceId, at: DateTime<Utc>) -> Result<()> {
        let mut entry = self
            .devices
            .get_mut(id)
            .ok_or_else(|| FleetError::not_found(format!("Device not found: {}", id)))?;
        entry.last_seen = at;
        Ok(())
    }

    async fn update_active_calls(&self, id: &DeviceId, count: u32) -> Result<()> {
        let mut entry = self
            .devices
            .get_mut(id)
            .ok_or_else(|| FleetError::not_found(format!("Device not found: {}", id)))?;
        entry.active_calls_count = count;
        Ok(())
    }

    async fn list_online(&self) -> Result<Vec<Device>> {
        Ok(self
            .devices
            .iter()
            .filter(|d| d.status == DeviceStatus::Online)
            .map(|d| d.clone())
            .collect())
    }
}
