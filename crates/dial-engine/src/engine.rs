//! Per-device orchestration engine
//!
//! Owns one device's mapper, queue, orchestrator, and reconciler, and runs
//! the event loop that serializes every state mutation for that device. The
//! dashboard process creates one engine per paired device; engines are
//! independent and never share state.
//!
//! Every handler catches and logs - nothing that arrives over the event
//! channel may terminate the loop.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

use outdial_fleet_core::command::{CommandAck, CommandEnvelope, DeviceCommand};
use outdial_fleet_core::{ActiveCallsWriter, DeviceId, DeviceStatus, DeviceStore};

use crate::campaign::{CampaignOrchestrator, CampaignPhase};
use crate::config::DialEngineConfig;
use crate::error::Result;
use crate::mapper::HandleMapper;
use crate::queue::{DialQueue, DialRequest};
use crate::reconciler::{CallStateReconciler, ReconcileOutcome};
use crate::store::CallStore;
use crate::telephony::{CallStateEvent, EventSource, NativeTelephony};
use crate::types::{CampaignProgress, CampaignSummary, NativeHandle};

/// Everything the engine's event loop consumes
#[derive(Debug)]
pub enum EngineEvent {
    /// Call state transition from any of the three channels
    CallState(CallStateEvent),
    /// Native batch-dialer progress callback
    CampaignProgress(CampaignProgress),
    /// Native batch-dialer completion callback
    CampaignCompleted,
    /// Dashboard command; the resulting ack is emitted on the ack stream
    Command(CommandEnvelope),
}

/// One device's orchestration core
///
/// Construction wires the components and spawns the event loop; the
/// orchestrator's readiness flag is raised once the loop is consuming, so
/// campaign starts cannot outrun event delivery.
pub struct DeviceEngine {
    device_id: DeviceId,
    telephony: Arc<dyn NativeTelephony>,
    device_store: Arc<dyn DeviceStore>,
    mapper: Arc<HandleMapper>,
    queue: Arc<DialQueue>,
    orchestrator: Arc<CampaignOrchestrator>,
    reconciler: CallStateReconciler,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
    acks_tx: mpsc::UnboundedSender<CommandAck>,
    acks_rx: Mutex<Option<mpsc::UnboundedReceiver<CommandAck>>>,
    completion_tx: watch::Sender<Option<CampaignSummary>>,
}

impl std::fmt::Debug for DeviceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceEngine")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

impl DeviceEngine {
    /// Build the engine for one device and start its event loop
    ///
    /// # Errors
    ///
    /// `Configuration` when the config fails
    /// [`DialEngineConfig::validate`].
    pub fn spawn(
        device_id: DeviceId,
        config: DialEngineConfig,
        telephony: Arc<dyn NativeTelephony>,
        call_store: Arc<dyn CallStore>,
        device_store: Arc<dyn DeviceStore>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let mapper = Arc::new(HandleMapper::new());
        let writer = ActiveCallsWriter::spawn(
            device_store.clone(),
            config.projection.coalesce_window,
        );
        let queue = Arc::new(DialQueue::new(
            device_id.clone(),
            config.queue.clone(),
            telephony.clone(),
            call_store.clone(),
            mapper.clone(),
            writer.clone(),
        ));
        let orchestrator = Arc::new(CampaignOrchestrator::new(
            device_id.clone(),
            config.campaign.clone(),
            telephony.clone(),
            call_store.clone(),
            mapper.clone(),
            queue.clone(),
            writer,
        ));
        let reconciler = CallStateReconciler::new(mapper.clone(), call_store);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (acks_tx, acks_rx) = mpsc::unbounded_channel();
        let (completion_tx, _) = watch::channel(None);

        let engine = Arc::new(Self {
            device_id,
            telephony,
            device_store,
            mapper,
            queue,
            orchestrator,
            reconciler,
            events_tx,
            acks_tx,
            acks_rx: Mutex::new(Some(acks_rx)),
            completion_tx,
        });

        tokio::spawn(run_event_loop(engine.clone(), events_rx));
        Ok(engine)
    }

    /// Submit an event for serialized processing
    pub fn submit(&self, event: EngineEvent) {
        if self.events_tx.send(event).is_err() {
            error!("Event loop for {} is gone; event dropped", self.device_id);
        }
    }

    /// Take the command acknowledgement stream
    ///
    /// Acks for commands submitted as [`EngineEvent::Command`] arrive here.
    /// Can be taken once.
    pub fn take_ack_stream(&self) -> Option<UnboundedReceiverStream<CommandAck>> {
        self.acks_rx.lock().take().map(UnboundedReceiverStream::new)
    }

    /// Subscribe to campaign completion summaries
    pub fn completion_watch(&self) -> watch::Receiver<Option<CampaignSummary>> {
        self.completion_tx.subscribe()
    }

    /// Republished campaign progress
    pub fn progress_watch(&self) -> watch::Receiver<Option<CampaignProgress>> {
        self.orchestrator.progress_watch()
    }

    /// Current campaign phase
    pub fn campaign_phase(&self) -> CampaignPhase {
        self.orchestrator.phase()
    }

    pub fn mapper(&self) -> &HandleMapper {
        &self.mapper
    }

    pub fn queue(&self) -> &Arc<DialQueue> {
        &self.queue
    }

    /// Poll fallback: snapshot the native active calls and feed them
    /// through the reconciler as `poll`-sourced events
    pub async fn poll_active_calls(&self) -> Result<()> {
        let snapshot = self.telephony.get_active_calls().await?;
        debug!(
            "Poll snapshot for {}: {} active call(s)",
            self.device_id,
            snapshot.len()
        );
        for call in snapshot {
            self.submit(EngineEvent::CallState(CallStateEvent::new(
                call.handle,
                call.number,
                call.state,
                EventSource::Poll,
            )));
        }
        Ok(())
    }

    /// Merge all active calls into a conference
    pub async fn merge_active_calls(&self) -> Result<String> {
        self.telephony.merge_active_calls().await
    }

    /// Execute one dashboard command and produce its acknowledgement
    ///
    /// Failures come back as `failed` acks, never as panics or loop exits.
    pub async fn execute(&self, envelope: &CommandEnvelope) -> CommandAck {
        if envelope.device_id != self.device_id {
            return CommandAck::failed(
                &envelope.command_id,
                self.device_id.clone(),
                format!("Command addressed to {}", envelope.device_id),
            );
        }
        debug!(
            "Executing {} ({}) on {}",
            envelope.command.name(),
            envelope.command_id,
            self.device_id
        );
        match self.dispatch(&envelope.command).await {
            Ok(()) => CommandAck::processed(&envelope.command_id, self.device_id.clone()),
            Err(e) => {
                warn!(
                    "Command {} failed on {}: {}",
                    envelope.command.name(),
                    self.device_id,
                    e
                );
                CommandAck::failed(&envelope.command_id, self.device_id.clone(), e.to_string())
            }
        }
    }

    async fn dispatch(&self, command: &DeviceCommand) -> Result<()> {
        match command {
            DeviceCommand::MakeCall { number } => {
                self.queue.enqueue(DialRequest::manual(number.clone()));
                Ok(())
            }
            DeviceCommand::StartCampaign {
                numbers,
                list_id,
                list_name,
            } => {
                self.orchestrator
                    .start(numbers, Some(list_id), Some(list_name))
                    .await?;
                Ok(())
            }
            DeviceCommand::EndCall { handle } => {
                self.telephony.end_call(&NativeHandle::new(handle.clone())).await
            }
            DeviceCommand::StopCampaign => {
                // The settle interval exists so in-flight disconnect events
                // can land; those events arrive on this very loop, so the
                // settle and sweep must run on their own task
                self.orchestrator.begin_stop().await?;
                let orchestrator = Arc::clone(&self.orchestrator);
                tokio::spawn(async move {
                    if let Err(e) = orchestrator.finish_stop().await {
                        error!("Campaign stop sweep failed: {}", e);
                    }
                });
                Ok(())
            }
            DeviceCommand::Unpair => self.unpair().await,
            DeviceCommand::MuteCall { handle, muted } => {
                self.telephony
                    .mute_call(&NativeHandle::new(handle.clone()), *muted)
                    .await
            }
            DeviceCommand::AnswerCall { handle } => {
                self.telephony.answer_call(&NativeHandle::new(handle.clone())).await
            }
        }
    }

    /// Unpair the device: stop any running campaign, drop waiting dial
    /// requests, then mark the device record terminal
    async fn unpair(&self) -> Result<()> {
        if self.orchestrator.phase() != CampaignPhase::Idle {
            match self.orchestrator.begin_stop().await {
                Ok(()) => {
                    let orchestrator = Arc::clone(&self.orchestrator);
                    tokio::spawn(async move {
                        if let Err(e) = orchestrator.finish_stop().await {
                            error!("Campaign stop sweep during unpair failed: {}", e);
                        }
                    });
                }
                Err(e) => warn!("Campaign stop during unpair failed: {}", e),
            }
        }
        // Nothing will dial for this device again
        self.queue.clear();
        self.device_store
            .update_status(&self.device_id, DeviceStatus::Unpaired)
            .await?;
        info!("Device {} unpaired", self.device_id);
        Ok(())
    }

    async fn handle_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::CallState(event) => {
                match self.reconciler.apply(&event).await {
                    Ok(ReconcileOutcome::Applied { record, status }) if status.is_terminal() => {
                        // Terminal frees the slot; backfill follows
                        debug!("Record {} terminal; freeing slot", record);
                        self.queue.release(&event.handle);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(
                            "Reconciliation failed for handle {} on {}: {}",
                            event.handle, self.device_id, e
                        );
                    }
                }
            }
            EngineEvent::CampaignProgress(progress) => {
                self.orchestrator.handle_progress(progress);
            }
            EngineEvent::CampaignCompleted => match self.orchestrator.handle_completed().await {
                Ok(summary) => {
                    // send_replace: the value must survive even when nobody
                    // is subscribed yet; a later subscriber still sees it
                    self.completion_tx.send_replace(Some(summary));
                }
                Err(e) => warn!("Completion callback ignored on {}: {}", self.device_id, e),
            },
            EngineEvent::Command(envelope) => {
                let ack = self.execute(&envelope).await;
                let _ = self.acks_tx.send(ack);
            }
        }
    }
}

/// Serialized per-device event loop
async fn run_event_loop(engine: Arc<DeviceEngine>, mut rx: mpsc::UnboundedReceiver<EngineEvent>) {
    // Listeners are attached the moment this task polls the channel
    engine
        .orchestrator
        .readiness_flag()
        .store(true, Ordering::SeqCst);
    info!("🎛️ Engine event loop running for {}", engine.device_id);

    while let Some(event) = rx.recv().await {
        engine.handle_event(event).await;
    }
    debug!("Engine event loop for {} drained", engine.device_id);
}
