//! Campaign orchestration
//!
//! Drives one outbound campaign per device through the phase machine
//! `idle → starting → running ⇄ paused → stopping → idle` (natural
//! exhaustion also lands back on `idle`). The orchestrator pre-creates one
//! durable `queued` record per number and registers each in the mapper's
//! pending bridge *before* handing the list to the native batch dialer, so
//! the first event for any number always finds its record.
//!
//! Progress is republished unmodified from the native progress callback;
//! the native layer, not this component, is the source of truth for
//! whether dialing is actually happening.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use outdial_fleet_core::{ActiveCallsWriter, DeviceId};

use crate::config::CampaignConfig;
use crate::error::{DialEngineError, Result};
use crate::mapper::HandleMapper;
use crate::queue::DialQueue;
use crate::store::CallStore;
use crate::telephony::NativeTelephony;
use crate::types::{CallRecord, CallStatus, CampaignProgress, CampaignSummary};

/// Orchestrator phase for the device's current campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignPhase {
    /// No campaign active
    Idle,
    /// Records being created; native dialer not yet started
    Starting,
    /// Native batch dialer running
    Running,
    /// Native batch dialer paused (display flag; native layer decides)
    Paused,
    /// Native stop issued; settle and sweep in progress
    Stopping,
}

impl CampaignPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignPhase::Idle => "idle",
            CampaignPhase::Starting => "starting",
            CampaignPhase::Running => "running",
            CampaignPhase::Paused => "paused",
            CampaignPhase::Stopping => "stopping",
        }
    }
}

/// Identifiers of the currently active batch
#[derive(Debug, Clone)]
struct ActiveBatch {
    campaign_id: String,
    session_id: String,
    total_numbers: usize,
}

/// Per-device campaign orchestrator
pub struct CampaignOrchestrator {
    device_id: DeviceId,
    config: CampaignConfig,
    telephony: Arc<dyn NativeTelephony>,
    store: Arc<dyn CallStore>,
    mapper: Arc<HandleMapper>,
    queue: Arc<DialQueue>,
    writer: ActiveCallsWriter,
    /// Set by the engine once its event listeners are attached; campaign
    /// starts are refused until then
    listeners_ready: Arc<AtomicBool>,
    phase: Mutex<CampaignPhase>,
    batch: Mutex<Option<ActiveBatch>>,
    progress_tx: watch::Sender<Option<CampaignProgress>>,
}

impl CampaignOrchestrator {
    pub fn new(
        device_id: DeviceId,
        config: CampaignConfig,
        telephony: Arc<dyn NativeTelephony>,
        store: Arc<dyn CallStore>,
        mapper: Arc<HandleMapper>,
        queue: Arc<DialQueue>,
        writer: ActiveCallsWriter,
    ) -> Self {
        let (progress_tx, _) = watch::channel(None);
        Self {
            device_id,
            config,
            telephony,
            store,
            mapper,
            queue,
            writer,
            listeners_ready: Arc::new(AtomicBool::new(false)),
            phase: Mutex::new(CampaignPhase::Idle),
            batch: Mutex::new(None),
            progress_tx,
        }
    }

    /// Flag flipped by the engine when reconciliation listeners attach
    pub fn readiness_flag(&self) -> Arc<AtomicBool> {
        self.listeners_ready.clone()
    }

    /// Current orchestrator phase
    pub fn phase(&self) -> CampaignPhase {
        *self.phase.lock()
    }

    /// Subscribe to republished campaign progress
    ///
    /// `None` means no active campaign.
    pub fn progress_watch(&self) -> watch::Receiver<Option<CampaignProgress>> {
        self.progress_tx.subscribe()
    }

    /// Start a campaign over the given numbers
    ///
    /// Returns the generated campaign id. Individual record-insert failures
    /// are skipped; the batch continues with the remaining numbers.
    ///
    /// # Errors
    ///
    /// `Campaign` when a campaign is already active or no number got a
    /// record; `Timeout` when the reconciliation listeners do not come up
    /// within the readiness budget.
    pub async fn start(
        &self,
        numbers: &[String],
        list_id: Option<&str>,
        list_name: Option<&str>,
    ) -> Result<String> {
        if numbers.is_empty() {
            return Err(DialEngineError::campaign("Campaign number list is empty"));
        }
        self.transition(&[CampaignPhase::Idle], CampaignPhase::Starting)?;

        if let Err(e) = self.await_listeners_ready().await {
            self.reset_phase();
            return Err(e);
        }

        let campaign_id = format!("camp-{}", Uuid::new_v4());
        let session_id = format!("sess-{}", Uuid::new_v4());
        info!(
            "🚀 Starting campaign {} on {} ({} numbers, list {:?}/{:?})",
            campaign_id,
            self.device_id,
            numbers.len(),
            list_id,
            list_name
        );

        // Records first, native dialer second: the first event for any
        // number must find its record through the pending bridge
        let mut created = 0usize;
        for number in numbers {
            let record = CallRecord::queued(number, Some(self.device_id.clone()))
                .with_campaign(&campaign_id, &session_id);
            let id = record.id.clone();
            match self.store.insert(record).await {
                Ok(()) => {
                    self.mapper.bind_by_number(number, id);
                    created += 1;
                }
                Err(e) => {
                    // Skip and continue; one bad record does not abort the batch
                    warn!("Record creation failed for {}: {}; skipping", number, e);
                }
            }
        }
        if created == 0 {
            self.mapper.clear_pending();
            self.reset_phase();
            return Err(DialEngineError::campaign(
                "No campaign number obtained a durable record",
            ));
        }

        if let Err(e) = self.telephony.start_campaign(numbers).await {
            warn!("Native batch dialer refused start: {}", e);
            self.mapper.clear_pending();
            self.reset_phase();
            return Err(e);
        }

        *self.batch.lock() = Some(ActiveBatch {
            campaign_id: campaign_id.clone(),
            session_id,
            total_numbers: numbers.len(),
        });
        *self.phase.lock() = CampaignPhase::Running;
        // send_replace: the watch must hold the value even with no
        // subscriber alive at this instant
        self.progress_tx.send_replace(Some(CampaignProgress {
            total_numbers: numbers.len(),
            ..Default::default()
        }));

        Ok(campaign_id)
    }

    /// Pause the native batch dialer
    pub async fn pause(&self) -> Result<()> {
        self.transition(&[CampaignPhase::Running], CampaignPhase::Paused)?;
        if let Err(e) = self.telephony.pause_campaign().await {
            *self.phase.lock() = CampaignPhase::Running;
            return Err(e);
        }
        self.progress_tx.send_modify(|p| {
            if let Some(p) = p {
                p.paused = true;
            }
        });
        Ok(())
    }

    /// Resume the native batch dialer
    pub async fn resume(&self) -> Result<()> {
        self.transition(&[CampaignPhase::Paused], CampaignPhase::Running)?;
        if let Err(e) = self.telephony.resume_campaign().await {
            *self.phase.lock() = CampaignPhase::Paused;
            return Err(e);
        }
        self.progress_tx.send_modify(|p| {
            if let Some(p) = p {
                p.paused = false;
            }
        });
        Ok(())
    }

    /// Stop the campaign and sweep its records terminal
    ///
    /// Native stop does not guarantee a terminal event per in-flight call.
    /// After a settle interval for late disconnect events, every remaining
    /// non-terminal record of the batch is forced to `ended` with
    /// best-effort duration. Returns the number of records the sweep had
    /// to force.
    ///
    /// Callers running inside the engine's event loop must not block on the
    /// settle interval, or the disconnect events the interval exists for
    /// would queue up behind it; they call [`begin_stop`](Self::begin_stop)
    /// and run [`finish_stop`](Self::finish_stop) on a separate task.
    pub async fn stop(&self) -> Result<usize> {
        self.begin_stop().await?;
        self.finish_stop().await
    }

    /// Enter `stopping` and issue the native stop; returns immediately
    pub async fn begin_stop(&self) -> Result<()> {
        self.transition(
            &[
                CampaignPhase::Starting,
                CampaignPhase::Running,
                CampaignPhase::Paused,
            ],
            CampaignPhase::Stopping,
        )?;

        if let Err(e) = self.telephony.stop_campaign().await {
            // Sweep anyway; records must not stay non-terminal
            warn!("Native batch dialer stop failed: {}", e);
        }
        Ok(())
    }

    /// Settle, sweep, and return to `idle`
    ///
    /// Only valid after [`begin_stop`](Self::begin_stop). Waiting manual
    /// dial requests are untouched; the campaign never owned them.
    pub async fn finish_stop(&self) -> Result<usize> {
        tokio::time::sleep(self.config.stop_settle).await;

        let session_id = self.batch.lock().as_ref().map(|b| b.session_id.clone());
        let swept = self.sweep_non_terminal(session_id.as_deref()).await?;

        self.mapper.clear_pending();
        self.progress_tx.send_replace(None);
        *self.batch.lock() = None;
        *self.phase.lock() = CampaignPhase::Idle;

        // Forced flush: the projection must be exact right after a stop
        self.writer
            .flush(self.device_id.clone(), self.queue.admitted_len() as u32)
            .await;

        info!(
            "🛑 Campaign stopped on {} ({} record(s) swept terminal)",
            self.device_id, swept
        );
        Ok(swept)
    }

    /// Republish a native progress callback unmodified
    pub fn handle_progress(&self, progress: CampaignProgress) {
        debug!(
            "Campaign progress on {}: {}/{} done, {} active",
            self.device_id,
            progress.completed_numbers,
            progress.total_numbers,
            progress.active_calls_count
        );
        self.progress_tx.send_replace(Some(progress));
    }

    /// Handle the native completion callback
    ///
    /// Natural exhaustion: clear progress and return to idle. Any record
    /// the native layer left non-terminal is swept, same as a deliberate
    /// stop.
    pub async fn handle_completed(&self) -> Result<CampaignSummary> {
        let batch = self.batch.lock().clone();
        let Some(batch) = batch else {
            return Err(DialEngineError::campaign(
                "Completion callback with no active campaign",
            ));
        };

        let swept = self.sweep_non_terminal(Some(&batch.session_id)).await?;
        if swept > 0 {
            debug!("Completion sweep forced {} record(s) terminal", swept);
        }
        self.mapper.clear_pending();
        self.progress_tx.send_replace(None);
        *self.batch.lock() = None;
        *self.phase.lock() = CampaignPhase::Idle;

        let summary = CampaignSummary {
            campaign_id: batch.campaign_id,
            total_attempts: batch.total_numbers,
        };
        info!(
            "✅ Campaign {} completed on {} ({} attempts)",
            summary.campaign_id, self.device_id, summary.total_attempts
        );
        Ok(summary)
    }

    /// Force every non-terminal record of the batch to `ended`
    async fn sweep_non_terminal(&self, session_id: Option<&str>) -> Result<usize> {
        let orphans = self
            .store
            .non_terminal_for_device(&self.device_id, session_id)
            .await?;
        let mut swept = 0;
        for record in orphans {
            let duration = match record.answered_at {
                Some(at) => (Utc::now() - at).num_seconds().max(0) as u64,
                None => 0,
            };
            match self
                .store
                .update_status(&record.id, CallStatus::Ended, duration)
                .await
            {
                Ok(()) => {
                    debug!(
                        "Swept record {} ({}, was {}) to ended",
                        record.id, record.number, record.status
                    );
                    swept += 1;
                }
                Err(e) => warn!("Sweep failed for record {}: {}", record.id, e),
            }
        }
        Ok(swept)
    }

    /// Poll the readiness flag until set or the budget is exhausted
    async fn await_listeners_ready(&self) -> Result<()> {
        let deadline = Instant::now() + self.config.readiness_timeout;
        loop {
            if self.listeners_ready.load(Ordering::SeqCst) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DialEngineError::timeout(format!(
                    "Reconciliation listeners not ready within {:?}",
                    self.config.readiness_timeout
                )));
            }
            tokio::time::sleep(self.config.readiness_poll_interval).await;
        }
    }

    fn transition(&self, from: &[CampaignPhase], to: CampaignPhase) -> Result<()> {
        let mut phase = self.phase.lock();
        if !from.contains(&*phase) {
            return Err(DialEngineError::campaign(format!(
                "Cannot enter {} from {}",
                to.as_str(),
                phase.as_str()
            )));
        }
        debug!("Campaign phase {} -> {}", phase.as_str(), to.as_str());
        *phase = to;
        Ok(())
    }

    fn reset_phase(&self) {
        *self.phase.lock() = CampaignPhase::Idle;
    }
}
