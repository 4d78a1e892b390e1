//! Shared fixtures for integration tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use outdial_dial_engine::prelude::*;
use outdial_dial_engine::telephony::ActiveCallInfo;
use outdial_fleet_core::{Device, DeviceId, DeviceStore, InMemoryDeviceStore};

/// Scripted telephony stack: sequential handles, recorded invocations
pub struct MockTelephony {
    next_handle: AtomicU32,
    pub started_calls: Mutex<Vec<(NativeHandle, String)>>,
    pub campaigns: Mutex<Vec<Vec<String>>>,
    pub stops: AtomicU32,
}

impl MockTelephony {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU32::new(1),
            started_calls: Mutex::new(Vec::new()),
            campaigns: Mutex::new(Vec::new()),
            stops: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl NativeTelephony for MockTelephony {
    async fn start_call(&self, number: &str) -> Result<NativeHandle> {
        let n = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let handle = NativeHandle::new(format!("call-{}", n));
        self.started_calls
            .lock()
            .push((handle.clone(), number.to_string()));
        Ok(handle)
    }

    async fn end_call(&self, _: &NativeHandle) -> Result<()> {
        Ok(())
    }

    async fn get_active_calls(&self) -> Result<Vec<ActiveCallInfo>> {
        Ok(Vec::new())
    }

    async fn merge_active_calls(&self) -> Result<String> {
        Ok("conference-1".to_string())
    }

    async fn mute_call(&self, _: &NativeHandle, _: bool) -> Result<()> {
        Ok(())
    }

    async fn answer_call(&self, _: &NativeHandle) -> Result<()> {
        Ok(())
    }

    async fn start_campaign(&self, numbers: &[String]) -> Result<()> {
        self.campaigns.lock().push(numbers.to_vec());
        Ok(())
    }

    async fn pause_campaign(&self) -> Result<()> {
        Ok(())
    }

    async fn resume_campaign(&self) -> Result<()> {
        Ok(())
    }

    async fn stop_campaign(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Harness {
    pub engine: Arc<DeviceEngine>,
    pub telephony: Arc<MockTelephony>,
    pub call_store: Arc<InMemoryCallStore>,
    pub device_store: Arc<InMemoryDeviceStore>,
    pub device_id: DeviceId,
}

/// One engine over in-memory stores with short test timings
pub async fn harness() -> Harness {
    // RUST_LOG=debug makes the engine's event flow visible in test output
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let telephony = Arc::new(MockTelephony::new());
    let call_store = Arc::new(InMemoryCallStore::new());
    let device_store = Arc::new(InMemoryDeviceStore::new());
    let device_id = DeviceId::from("device-7");
    device_store
        .upsert(Device::paired(device_id.clone()))
        .await
        .unwrap();

    let mut config = DialEngineConfig::default();
    config.queue.admit_debounce = std::time::Duration::from_millis(10);
    config.campaign.stop_settle = std::time::Duration::from_millis(20);

    let engine = DeviceEngine::spawn(
        device_id.clone(),
        config,
        telephony.clone(),
        call_store.clone(),
        device_store.clone(),
    )
    .unwrap();
    Harness {
        engine,
        telephony,
        call_store,
        device_store,
        device_id,
    }
}

/// Build a call state event from the native callback channel
pub fn native_event(handle: &str, number: &str, state: &str) -> EngineEvent {
    EngineEvent::CallState(CallStateEvent::new(
        NativeHandle::from(handle),
        number,
        state,
        EventSource::NativeCallback,
    ))
}
