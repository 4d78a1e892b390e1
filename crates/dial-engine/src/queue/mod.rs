//! Bounded-concurrency dial queue
//!
//! Each device admits at most a fixed number of concurrent native calls
//! (default 6). Requests beyond that wait in FIFO order; a slot freed by a
//! terminal event backfills from the queue. Admission is triggered on
//! enqueue and on release, debounced by a short delay so a burst of
//! releases coalesces into a single admission pass.
//!
//! A request that fails to dial is discarded, never retried. The failure is
//! logged, the slot stays free, and the next request is attempted in the
//! same pass.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use outdial_fleet_core::{ActiveCallsWriter, DeviceId};

use crate::config::QueueConfig;
use crate::mapper::HandleMapper;
use crate::store::CallStore;
use crate::telephony::NativeTelephony;
use crate::types::{CallId, CallRecord, CallStatus, NativeHandle};

/// Current occupancy of a device's dial queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub admitted: usize,
    pub waiting: usize,
    pub capacity: usize,
}

/// One dial request waiting for a slot
#[derive(Debug, Clone)]
pub struct DialRequest {
    pub number: String,
    /// Pre-created durable record, supplied by the campaign path. Manual
    /// calls leave this empty and get a record at admission time.
    pub record: Option<CallId>,
}

impl DialRequest {
    /// Manual call: the record is created when the request is admitted
    pub fn manual(number: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            record: None,
        }
    }

    /// Campaign call: the record already exists
    pub fn for_record(number: impl Into<String>, record: CallId) -> Self {
        Self {
            number: number.into(),
            record: Some(record),
        }
    }
}

/// Per-device FIFO queue feeding the native dial primitive
///
/// The admitted set is owned by this component alone; the reconciler and
/// orchestrator observe it only through [`admitted_len`].
///
/// [`admitted_len`]: DialQueue::admitted_len
pub struct DialQueue {
    device_id: DeviceId,
    config: QueueConfig,
    telephony: Arc<dyn NativeTelephony>,
    store: Arc<dyn CallStore>,
    mapper: Arc<HandleMapper>,
    writer: ActiveCallsWriter,
    pending: Mutex<VecDeque<DialRequest>>,
    /// Handle → record for every currently admitted call
    admitted: DashMap<NativeHandle, CallId>,
    /// Serializes admission passes so the capacity check cannot race
    admit_gate: AsyncMutex<()>,
    /// Set while a debounced admission pass is scheduled
    admit_scheduled: AtomicBool,
}

impl DialQueue {
    pub fn new(
        device_id: DeviceId,
        config: QueueConfig,
        telephony: Arc<dyn NativeTelephony>,
        store: Arc<dyn CallStore>,
        mapper: Arc<HandleMapper>,
        writer: ActiveCallsWriter,
    ) -> Self {
        Self {
            device_id,
            config,
            telephony,
            store,
            mapper,
            writer,
            pending: Mutex::new(VecDeque::new()),
            admitted: DashMap::new(),
            admit_gate: AsyncMutex::new(()),
            admit_scheduled: AtomicBool::new(false),
        }
    }

    /// Append a request and schedule an admission pass
    pub fn enqueue(self: &Arc<Self>, request: DialRequest) {
        debug!("Queueing dial request for {}", request.number);
        self.pending.lock().push_back(request);
        self.schedule_admit();
    }

    /// Free the slot held by a terminated call and schedule a backfill
    ///
    /// Idempotent: releasing a handle that holds no slot is a no-op.
    pub fn release(self: &Arc<Self>, handle: &NativeHandle) {
        if let Some((_, record)) = self.admitted.remove(handle) {
            debug!("Slot freed by handle {} (record {})", handle, record);
            self.writer
                .update(self.device_id.clone(), self.admitted.len() as u32);
            self.schedule_admit();
        }
    }

    /// Schedule a debounced admission pass
    ///
    /// Triggers within the debounce window collapse into one pass.
    pub fn schedule_admit(self: &Arc<Self>) {
        if self.admit_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let queue = self.clone();
        let delay = self.config.admit_debounce;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.admit_scheduled.store(false, Ordering::SeqCst);
            queue.admit().await;
        });
    }

    /// Fill open slots from the queue, oldest request first
    ///
    /// Each admission dials through the native primitive, obtains or
    /// creates the durable record, marks it `dialing`, and binds the
    /// returned handle. A dial failure discards that request and the pass
    /// continues with the next.
    pub async fn admit(self: &Arc<Self>) {
        let _gate = self.admit_gate.lock().await;

        while self.admitted.len() < self.config.max_concurrent_calls {
            let request = match self.pending.lock().pop_front() {
                Some(r) => r,
                None => break,
            };

            match self.telephony.start_call(&request.number).await {
                Ok(handle) => {
                    match self.record_for(&request).await {
                        Ok(record) => {
                            self.mapper.bind(handle.clone(), record.clone());
                            self.admitted.insert(handle.clone(), record.clone());
                            info!(
                                "📞 Admitted {} as handle {} (record {}, {}/{} slots)",
                                request.number,
                                handle,
                                record,
                                self.admitted.len(),
                                self.config.max_concurrent_calls
                            );
                        }
                        Err(e) => {
                            // Dial went out but no record could be attached;
                            // tear the call down rather than track it blind
                            warn!(
                                "No durable record for admitted call {}: {}; ending it",
                                request.number, e
                            );
                            if let Err(e) = self.telephony.end_call(&handle).await {
                                warn!("Failed to end recordless call {}: {}", handle, e);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Dial failed for {}: {}; request discarded", request.number, e);
                    self.close_failed_request(&request).await;
                }
            }
        }

        self.writer
            .update(self.device_id.clone(), self.admitted.len() as u32);
    }

    /// Number of requests still waiting for a slot
    pub fn queued_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of currently admitted calls
    pub fn admitted_len(&self) -> usize {
        self.admitted.len()
    }

    /// Snapshot of queue occupancy
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            admitted: self.admitted.len(),
            waiting: self.pending.lock().len(),
            capacity: self.config.max_concurrent_calls,
        }
    }

    /// Drop every waiting request without dialing
    pub fn clear(&self) {
        let dropped = {
            let mut pending = self.pending.lock();
            let n = pending.len();
            pending.clear();
            n
        };
        if dropped > 0 {
            debug!("Dropped {} waiting dial request(s)", dropped);
        }
    }

    /// Obtain the durable record for an admitted request
    async fn record_for(&self, request: &DialRequest) -> crate::error::Result<CallId> {
        match &request.record {
            Some(id) => {
                self.store.update_status(id, CallStatus::Dialing, 0).await?;
                Ok(id.clone())
            }
            None => {
                let record =
                    CallRecord::queued(&request.number, Some(self.device_id.clone()));
                let id = record.id.clone();
                self.store.insert(record).await?;
                self.store.update_status(&id, CallStatus::Dialing, 0).await?;
                Ok(id)
            }
        }
    }

    /// Close out a pre-created record whose dial never went out
    ///
    /// Keeps the stop sweep from finding a permanently `queued` record for
    /// a number that will never produce an event.
    async fn close_failed_request(&self, request: &DialRequest) {
        if let Some(id) = &request.record {
            if let Err(e) = self.store.update_status(id, CallStatus::Ended, 0).await {
                warn!("Failed to close record {} after dial failure: {}", id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCallStore;
    use crate::testing::FakeTelephony;
    use outdial_fleet_core::InMemoryDeviceStore;
    use std::time::Duration;

    struct Fixture {
        queue: Arc<DialQueue>,
        store: Arc<InMemoryCallStore>,
        mapper: Arc<HandleMapper>,
    }

    fn fixture_with(telephony: FakeTelephony, max: usize) -> Fixture {
        let store = Arc::new(InMemoryCallStore::new());
        let mapper = Arc::new(HandleMapper::new());
        let device_store = Arc::new(InMemoryDeviceStore::new());
        let writer = ActiveCallsWriter::spawn(device_store, Duration::from_millis(1));
        let config = QueueConfig {
            max_concurrent_calls: max,
            admit_debounce: Duration::from_millis(100),
        };
        let queue = Arc::new(DialQueue::new(
            DeviceId::from("dev-1"),
            config,
            Arc::new(telephony),
            store.clone(),
            mapper.clone(),
            writer,
        ));
        Fixture {
            queue,
            store,
            mapper,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_is_never_exceeded() {
        // Cap 2, cap + 5 requests: exactly 5 wait until a release
        let f = fixture_with(FakeTelephony::new(), 2);
        for i in 0..7 {
            f.queue.enqueue(DialRequest::manual(format!("+1555000{}", i)));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stats = f.queue.stats();
        assert_eq!(stats.admitted, 2);
        assert_eq!(stats.waiting, 5);
        assert_eq!(stats.capacity, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn release_backfills_in_fifo_order() {
        let f = fixture_with(FakeTelephony::new(), 1);
        f.queue.enqueue(DialRequest::manual("+15550000"));
        f.queue.enqueue(DialRequest::manual("+15550001"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(f.queue.admitted_len(), 1);

        f.queue.release(&NativeHandle::from("call-1"));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(f.queue.admitted_len(), 1);
        assert_eq!(f.queue.queued_len(), 0);
        // Second request got the recycled slot and a fresh handle
        let record = f.mapper.resolve(&NativeHandle::from("call-2")).unwrap();
        let record = f.store.get(&record).await.unwrap().unwrap();
        assert_eq!(record.number, "+15550001");
    }

    #[tokio::test(start_paused = true)]
    async fn dial_failure_discards_without_blocking_the_pass() {
        let f = fixture_with(FakeTelephony::failing(&["+1BAD"]), 6);
        f.queue.enqueue(DialRequest::manual("+15550000"));
        f.queue.enqueue(DialRequest::manual("+1BAD"));
        f.queue.enqueue(DialRequest::manual("+15550001"));
        tokio::time::sleep(Duration::from_millis(200)).await;

        // Failed request consumed no slot and was not retried
        assert_eq!(f.queue.admitted_len(), 2);
        assert_eq!(f.queue.queued_len(), 0);
        assert_eq!(f.store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_precreated_record_is_closed_out() {
        let f = fixture_with(FakeTelephony::failing(&["+1BAD"]), 6);
        let record = CallRecord::queued("+1BAD", Some(DeviceId::from("dev-1")));
        let id = record.id.clone();
        f.store.insert(record).await.unwrap();

        f.queue.enqueue(DialRequest::for_record("+1BAD", id.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let record = f.store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, CallStatus::Ended);
        assert_eq!(record.duration_seconds, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_admission_creates_a_dialing_record() {
        let f = fixture_with(FakeTelephony::new(), 6);
        f.queue.enqueue(DialRequest::manual("+15550000"));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let id = f.mapper.resolve(&NativeHandle::from("call-1")).unwrap();
        let record = f.store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, CallStatus::Dialing);
        assert_eq!(record.device_id, Some(DeviceId::from("dev-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_triggers_coalesces_into_one_pass() {
        let f = fixture_with(FakeTelephony::new(), 6);
        for i in 0..3 {
            f.queue.enqueue(DialRequest::manual(format!("+1555000{}", i)));
        }
        // All three landed within one debounce window
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.queue.admitted_len(), 0);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(f.queue.admitted_len(), 3);
    }
}
