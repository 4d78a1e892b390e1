//! Debounced active-calls projection writer
//!
//! The durable `active_calls_count` on a device is a read optimization, not
//! a live counter. Under bursty call churn the admitted-set size can change
//! many times per second; writing every change would amplify store traffic
//! for no observable benefit. This writer is a small actor that owns a
//! last-written cache: updates coalesce over a short window, writes are
//! skipped entirely when the value is unchanged, and callers that need
//! precision (right after a campaign stop) can force an immediate flush.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::device::DeviceId;
use crate::store::DeviceStore;

/// Default coalescing window
pub const DEFAULT_COALESCE_WINDOW: Duration = Duration::from_millis(300);

enum Msg {
    /// Coalesced update; written when the window elapses
    Update { device: DeviceId, count: u32 },
    /// Immediate write, bypassing the window (still skip-if-unchanged)
    Flush {
        device: DeviceId,
        count: u32,
        done: oneshot::Sender<()>,
    },
}

/// Handle to the coalescing writer actor
///
/// Cheap to clone; all clones feed the same actor task. Dropping every
/// handle drains pending writes and stops the task.
#[derive(Clone)]
pub struct ActiveCallsWriter {
    tx: mpsc::UnboundedSender<Msg>,
}

impl ActiveCallsWriter {
    /// Spawn the writer actor over the given store
    pub fn spawn(store: Arc<dyn DeviceStore>, window: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(store, window, rx));
        Self { tx }
    }

    /// Record a new admitted-set size for a device
    ///
    /// The write lands after the coalescing window; intervening updates for
    /// the same device overwrite each other so only the latest value is
    /// persisted.
    pub fn update(&self, device: DeviceId, count: u32) {
        let _ = self.tx.send(Msg::Update { device, count });
    }

    /// Write a device's count immediately and wait for the store write
    pub async fn flush(&self, device: DeviceId, count: u32) {
        let (done, wait) = oneshot::channel();
        if self
            .tx
            .send(Msg::Flush {
                device,
                count,
                done,
            })
            .is_ok()
        {
            let _ = wait.await;
        }
    }
}

async fn run(
    store: Arc<dyn DeviceStore>,
    window: Duration,
    mut rx: mpsc::UnboundedReceiver<Msg>,
) {
    let mut last_written: HashMap<DeviceId, u32> = HashMap::new();
    let mut pending: HashMap<DeviceId, u32> = HashMap::new();

    let timer = tokio::time::sleep(window);
    tokio::pin!(timer);
    let mut timer_armed = false;

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(Msg::Update { device, count }) => {
                    pending.insert(device, count);
                    if !timer_armed {
                        timer.as_mut().reset(Instant::now() + window);
                        timer_armed = true;
                    }
                }
                Some(Msg::Flush { device, count, done }) => {
                    pending.remove(&device);
                    write_if_changed(&store, &mut last_written, &device, count).await;
                    let _ = done.send(());
                }
                None => {
                    // All handles dropped; drain pending writes and exit
                    for (device, count) in pending.drain() {
                        write_if_changed(&store, &mut last_written, &device, count).await;
                    }
                    break;
                }
            },
            _ = &mut timer, if timer_armed => {
                timer_armed = false;
                for (device, count) in pending.drain() {
                    write_if_changed(&store, &mut last_written, &device, count).await;
                }
            }
        }
    }
}

async fn write_if_changed(
    store: &Arc<dyn DeviceStore>,
    last_written: &mut HashMap<DeviceId, u32>,
    device: &DeviceId,
    count: u32,
) {
    if last_written.get(device) == Some(&count) {
        debug!("Skipping unchanged active_calls_count={} for {}", count, device);
        return;
    }
    match store.update_active_calls(device, count).await {
        Ok(()) => {
            last_written.insert(device.clone(), count);
            debug!("📊 active_calls_count={} written for {}", count, device);
        }
        Err(e) => {
            warn!("Failed to write active_calls_count for {}: {}", device, e);
        }
    }
}
