//! Shared test doubles

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{DialEngineError, Result};
use crate::telephony::{ActiveCallInfo, NativeTelephony};
use crate::types::NativeHandle;

/// Scripted stand-in for the platform telephony stack
///
/// Allocates sequential handles (`call-1`, `call-2`, …), records every
/// invocation, and rejects dials for configured numbers.
pub struct FakeTelephony {
    next_handle: AtomicU32,
    pub fail_numbers: Mutex<HashSet<String>>,
    pub started_calls: Mutex<Vec<(NativeHandle, String)>>,
    pub ended_calls: Mutex<Vec<NativeHandle>>,
    pub muted_calls: Mutex<Vec<(NativeHandle, bool)>>,
    pub answered_calls: Mutex<Vec<NativeHandle>>,
    pub campaigns: Mutex<Vec<Vec<String>>>,
    pub pauses: AtomicU32,
    pub resumes: AtomicU32,
    pub stops: AtomicU32,
    pub active: Mutex<Vec<ActiveCallInfo>>,
}

impl FakeTelephony {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU32::new(1),
            fail_numbers: Mutex::new(HashSet::new()),
            started_calls: Mutex::new(Vec::new()),
            ended_calls: Mutex::new(Vec::new()),
            muted_calls: Mutex::new(Vec::new()),
            answered_calls: Mutex::new(Vec::new()),
            campaigns: Mutex::new(Vec::new()),
            pauses: AtomicU32::new(0),
            resumes: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            active: Mutex::new(Vec::new()),
        }
    }

    /// Variant that rejects dials for the given numbers
    pub fn failing(numbers: &[&str]) -> Self {
        let t = Self::new();
        *t.fail_numbers.lock() = numbers.iter().map(|n| n.to_string()).collect();
        t
    }
}

impl Default for FakeTelephony {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NativeTelephony for FakeTelephony {
    async fn start_call(&self, number: &str) -> Result<NativeHandle> {
        if self.fail_numbers.lock().contains(number) {
            return Err(DialEngineError::telephony(format!(
                "Dial rejected for {}",
                number
            )));
        }
        let n = self.next_handle.fetch_add(1, Ordering::SeqCst);
        let handle = NativeHandle::new(format!("call-{}", n));
        self.started_calls
            .lock()
            .push((handle.clone(), number.to_string()));
        Ok(handle)
    }

    async fn end_call(&self, handle: &NativeHandle) -> Result<()> {
        self.ended_calls.lock().push(handle.clone());
        Ok(())
    }

    async fn get_active_calls(&self) -> Result<Vec<ActiveCallInfo>> {
        Ok(self.active.lock().clone())
    }

    async fn merge_active_calls(&self) -> Result<String> {
        Ok("conference-1".to_string())
    }

    async fn mute_call(&self, handle: &NativeHandle, muted: bool) -> Result<()> {
        self.muted_calls.lock().push((handle.clone(), muted));
        Ok(())
    }

    async fn answer_call(&self, handle: &NativeHandle) -> Result<()> {
        self.answered_calls.lock().push(handle.clone());
        Ok(())
    }

    async fn start_campaign(&self, numbers: &[String]) -> Result<()> {
        self.campaigns.lock().push(numbers.to_vec());
        Ok(())
    }

    async fn pause_campaign(&self) -> Result<()> {
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resume_campaign(&self) -> Result<()> {
        self.resumes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_campaign(&self) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
