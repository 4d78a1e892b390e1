//! Identifier mapping between native handles and durable records
//!
//! The telephony stack identifies calls by an ephemeral, device-local
//! handle that is recycled after a call terminates. Durable records are
//! created before the handle exists (campaigns pre-create every record), so
//! the mapper keeps two maps: the primary handle-keyed map and a secondary
//! number-keyed pending bridge covering the window between record creation
//! and handle assignment, with an explicit promotion step between them.
//!
//! The two maps are owned by this component alone; the reconciler and
//! orchestrator interact with them only through this interface.

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::types::{CallId, NativeHandle};

/// Dual-keyed registry mapping native handles and pending numbers to
/// durable call record ids
///
/// # Handle recycling
///
/// [`release`] must be invoked on every call's terminal event. A missed
/// release leaks the mapping and risks misattributing a future call that
/// reuses the same native handle to a finished record. Release is
/// idempotent: releasing an unknown handle is a no-op.
///
/// # Examples
///
/// ```
/// use outdial_dial_engine::mapper::HandleMapper;
/// use outdial_dial_engine::types::{CallId, NativeHandle};
///
/// let mapper = HandleMapper::new();
/// let record = CallId::new();
///
/// // Campaign path: record exists before the handle does
/// mapper.bind_by_number("+15550000", record.clone());
///
/// // First event arrives carrying both handle and number
/// let handle = NativeHandle::from("call-3");
/// let resolved = mapper.resolve_and_promote(&handle, "+15550000");
/// assert_eq!(resolved, Some(record.clone()));
///
/// // Subsequent events resolve by handle alone
/// assert_eq!(mapper.resolve(&handle), Some(record));
/// ```
///
/// [`release`]: HandleMapper::release
pub struct HandleMapper {
    /// Primary mapping: native handle → durable record
    by_handle: DashMap<NativeHandle, CallId>,
    /// Pending bridge: dialed number → durable record, used only before a
    /// handle is assigned
    by_number: DashMap<String, CallId>,
}

impl HandleMapper {
    pub fn new() -> Self {
        Self {
            by_handle: DashMap::new(),
            by_number: DashMap::new(),
        }
    }

    /// Bind a native handle to a durable record
    ///
    /// At most one record per handle: rebinding an existing handle replaces
    /// the mapping with a diagnostic, which covers handle recycling after a
    /// missed release.
    pub fn bind(&self, handle: NativeHandle, record: CallId) {
        if let Some(previous) = self.by_handle.insert(handle.clone(), record.clone()) {
            if previous != record {
                warn!(
                    "Handle {} rebound from record {} to {} (stale mapping replaced)",
                    handle, previous, record
                );
                return;
            }
        }
        debug!("Bound handle {} to record {}", handle, record);
    }

    /// Register a pending number → record entry before a handle exists
    ///
    /// A number may appear at most once per active batch; registering the
    /// same number again replaces the entry with a diagnostic.
    pub fn bind_by_number(&self, number: impl Into<String>, record: CallId) {
        let number = number.into();
        if let Some(previous) = self.by_number.insert(number.clone(), record.clone()) {
            warn!(
                "Pending entry for {} replaced (was record {}, now {})",
                number, previous, record
            );
            return;
        }
        debug!("Registered pending entry {} -> record {}", number, record);
    }

    /// Look up the record bound to a handle
    pub fn resolve(&self, handle: &NativeHandle) -> Option<CallId> {
        self.by_handle.get(handle).map(|r| r.clone())
    }

    /// Resolve by handle, falling back to the pending bridge
    ///
    /// On a pending-bridge hit the entry is promoted into the handle-keyed
    /// map and removed from the bridge, so later events resolve with a
    /// single lookup. Returns `None` when neither map knows the call; the
    /// caller drops such events with a diagnostic.
    pub fn resolve_and_promote(&self, handle: &NativeHandle, number: &str) -> Option<CallId> {
        if let Some(record) = self.by_handle.get(handle) {
            return Some(record.clone());
        }

        let (_, record) = self.by_number.remove(number)?;
        self.by_handle.insert(handle.clone(), record.clone());
        debug!(
            "Promoted pending entry {} into handle {} (record {})",
            number, handle, record
        );
        Some(record)
    }

    /// Remove a handle's mapping after its terminal event
    ///
    /// Idempotent: releasing an already-released or never-bound handle is a
    /// no-op.
    pub fn release(&self, handle: &NativeHandle) {
        match self.by_handle.remove(handle) {
            Some((_, record)) => debug!("Released handle {} (record {})", handle, record),
            None => debug!("Release of unknown handle {} ignored", handle),
        }
    }

    /// Drop every pending-bridge entry
    ///
    /// Invoked at campaign stop: numbers that never got a native handle
    /// must not bleed into a later batch.
    pub fn clear_pending(&self) {
        let count = self.by_number.len();
        if count > 0 {
            debug!("Clearing {} pending entr(ies)", count);
        }
        self.by_number.clear();
    }

    /// Snapshot of map sizes
    pub fn stats(&self) -> MapperStats {
        MapperStats {
            bound_handles: self.by_handle.len(),
            pending_numbers: self.by_number.len(),
        }
    }
}

impl Default for HandleMapper {
    fn default() -> Self {
        Self::new()
    }
}

/// Current sizes of the mapper's two maps
#[derive(Debug, Clone)]
pub struct MapperStats {
    pub bound_handles: usize,
    pub pending_numbers: usize,
}
