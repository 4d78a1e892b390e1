//! Call store trait and in-memory implementation
//!
//! The orchestration core needs a handful of durable operations: insert a
//! record, read it back, persist status/duration, and enumerate a device's
//! non-terminal records for the stop sweep. Query surfaces beyond that
//! (history views, reporting) belong to the external persistence
//! collaborator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use outdial_fleet_core::DeviceId;

use crate::error::{DialEngineError, Result};
use crate::types::{CallId, CallRecord, CallStatus};

/// Minimal persistence contract for call records
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Insert a new record
    async fn insert(&self, record: CallRecord) -> Result<()>;

    /// Fetch a record by id
    async fn get(&self, id: &CallId) -> Result<Option<CallRecord>>;

    /// Persist status and duration
    async fn update_status(&self, id: &CallId, status: CallStatus, duration_seconds: u64)
        -> Result<()>;

    /// Record the answer timestamp
    ///
    /// Implementations keep the first value: a second write for the same
    /// record is ignored, so the duration basis never moves.
    async fn set_answered_at(&self, id: &CallId, at: DateTime<Utc>) -> Result<()>;

    /// All non-terminal records owned by a device, optionally narrowed to
    /// one campaign session
    async fn non_terminal_for_device(
        &self,
        device_id: &DeviceId,
        session_id: Option<&str>,
    ) -> Result<Vec<CallRecord>>;

    /// Soft-delete toggle for history views
    async fn set_hidden(&self, id: &CallId, hidden: bool) -> Result<()>;

    /// Hard-delete records (single or bulk)
    async fn delete(&self, ids: &[CallId]) -> Result<u64>;
}

/// In-memory call store backed by a concurrent map
///
/// The reference implementation used by tests and single-process
/// deployments; [`crate::database::SqliteCallStore`] is the durable one.
#[derive(Default)]
pub struct InMemoryCallStore {
    records: DashMap<CallId, CallRecord>,
}

impl InMemoryCallStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl CallStore for InMemoryCallStore {
    async fn insert(&self, record: CallRecord) -> Result<()> {
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &CallId) -> Result<Option<CallRecord>> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn update_status(
        &self,
        id: &CallId,
        status: CallStatus,
        duration_seconds: u64,
    ) -> Result<()> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| DialEngineError::not_found(format!("Call record not found: {}", id)))?;
        entry.status = status;
        entry.duration_seconds = duration_seconds;
        Ok(())
    }

    async fn set_answered_at(&self, id: &CallId, at: DateTime<Utc>) -> Result<()> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| DialEngineError::not_found(format!("Call record not found: {}", id)))?;
        if entry.answered_at.is_none() {
            entry.answered_at = Some(at);
        }
        Ok(())
    }

    async fn non_terminal_for_device(
        &self,
        device_id: &DeviceId,
        session_id: Option<&str>,
    ) -> Result<Vec<CallRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| {
                !r.status.is_terminal()
                    && r.device_id.as_ref() == Some(device_id)
                    && session_id.map_or(true, |s| r.session_id.as_deref() == Some(s))
            })
            .map(|r| r.clone())
            .collect())
    }

    async fn set_hidden(&self, id: &CallId, hidden: bool) -> Result<()> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| DialEngineError::not_found(format!("Call record not found: {}", id)))?;
        entry.hidden = hidden;
        Ok(())
    }

    async fn delete(&self, ids: &[CallId]) -> Result<u64> {
        let mut removed = 0;
        for id in ids {
            if self.records.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
