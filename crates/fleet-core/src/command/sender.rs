//! Reliable command delivery
//!
//! Commands that matter (call control, campaign control, unpair) are routed
//! through this sender rather than fire-and-forget broadcast. The sender
//! arms a per-command acknowledgement timeout and retries delivery a bounded
//! number of times before surfacing the failure to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::command::envelope::{CommandAck, CommandEnvelope};
use crate::error::{FleetError, Result};

/// Transport seam for the broadcast channel
///
/// Implementations are expected to be at-least-once and best-effort; the
/// retry policy above them compensates for lost sends and lost acks.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Push one envelope toward the target device
    async fn send(&self, envelope: &CommandEnvelope) -> Result<()>;
}

/// Retry behavior for reliable command delivery
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delivery attempts before the command is reported failed
    pub max_attempts: u32,
    /// How long to wait for an acknowledgement per attempt
    pub ack_timeout: Duration,
    /// Pause between attempts
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            ack_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Sends commands over a [`CommandTransport`] and correlates acknowledgements
///
/// Every in-flight command holds a oneshot slot keyed by its correlation id.
/// The transport's receive side feeds acks back through [`handle_ack`];
/// retries reuse the original correlation id so a late ack to an earlier
/// attempt still completes the command.
///
/// [`handle_ack`]: ReliableCommandSender::handle_ack
pub struct ReliableCommandSender {
    transport: Arc<dyn CommandTransport>,
    policy: RetryPolicy,
    pending: DashMap<String, oneshot::Sender<CommandAck>>,
}

impl ReliableCommandSender {
    pub fn new(transport: Arc<dyn CommandTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            pending: DashMap::new(),
        }
    }

    /// Deliver one command, retrying until acknowledged or attempts exhausted
    ///
    /// Returns the acknowledgement on success. Transport failures and ack
    /// timeouts both count as failed attempts; after the final attempt the
    /// error is surfaced to the caller.
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<CommandAck> {
        let command_id = envelope.command_id.clone();

        for attempt in 1..=self.policy.max_attempts {
            let (tx, rx) = oneshot::channel();
            self.pending.insert(command_id.clone(), tx);

            if let Err(e) = self.transport.send(&envelope).await {
                warn!(
                    "📡 Send attempt {}/{} for command {} failed: {}",
                    attempt, self.policy.max_attempts, command_id, e
                );
                self.pending.remove(&command_id);
                tokio::time::sleep(self.policy.retry_delay).await;
                continue;
            }

            match tokio::time::timeout(self.policy.ack_timeout, rx).await {
                Ok(Ok(ack)) => {
                    debug!("✅ Command {} acknowledged: {:?}", command_id, ack.status);
                    return Ok(ack);
                }
                Ok(Err(_)) | Err(_) => {
                    warn!(
                        "⏰ No ack for command {} within {:?} (attempt {}/{})",
                        command_id, self.policy.ack_timeout, attempt, self.policy.max_attempts
                    );
                    self.pending.remove(&command_id);
                }
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.retry_delay).await;
            }
        }

        Err(FleetError::timeout(format!(
            "Command {} not acknowledged after {} attempts",
            command_id, self.policy.max_attempts
        )))
    }

    /// Feed an acknowledgement from the transport's receive side
    ///
    /// Acks for unknown or already-completed commands are dropped with a
    /// diagnostic; duplicates are expected on an at-least-once channel.
    pub fn handle_ack(&self, ack: CommandAck) {
        match self.pending.remove(&ack.command_id) {
            Some((_, tx)) => {
                let _ = tx.send(ack);
            }
            None => {
                debug!("Dropping ack for unknown command {}", ack.command_id);
            }
        }
    }

    /// Number of commands currently awaiting acknowledgement
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::envelope::{AckStatus, DeviceCommand};
    use crate::device::DeviceId;
    use std::sync::atomic::{AtomicU32, Ordering};

    use std::sync::{Mutex, Weak};

    /// Transport that records attempts and acks after a configured number of
    /// dropped deliveries
    struct FlakyTransport {
        attempts: AtomicU32,
        deliver_after: u32,
        /// Weak backref so the transport can feed acks into the sender
        sender: Mutex<Weak<ReliableCommandSender>>,
    }

    impl FlakyTransport {
        fn new(deliver_after: u32) -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicU32::new(0),
                deliver_after,
                sender: Mutex::new(Weak::new()),
            })
        }

        fn attach(&self, sender: &Arc<ReliableCommandSender>) {
            *self.sender.lock().unwrap() = Arc::downgrade(sender);
        }
    }

    #[async_trait]
    impl CommandTransport for FlakyTransport {
        async fn send(&self, envelope: &CommandEnvelope) -> Result<()> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.deliver_after {
                if let Some(sender) = self.sender.lock().unwrap().upgrade() {
                    sender.handle_ack(CommandAck::processed(
                        envelope.command_id.clone(),
                        envelope.device_id.clone(),
                    ));
                }
            }
            Ok(())
        }
    }

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            ack_timeout: Duration::from_millis(50),
            retry_delay: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn ack_on_second_attempt_succeeds() {
        let transport = FlakyTransport::new(2);
        let sender = Arc::new(ReliableCommandSender::new(
            transport.clone(),
            quick_policy(),
        ));
        transport.attach(&sender);

        let envelope = CommandEnvelope::new(
            DeviceId::from("dev-1"),
            DeviceCommand::MakeCall {
                number: "+15550000".into(),
            },
        );
        let ack = sender.send(envelope).await.unwrap();
        assert_eq!(ack.status, AckStatus::Processed);
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(sender.pending_count(), 0);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_timeout() {
        let transport = FlakyTransport::new(u32::MAX);
        let sender = Arc::new(ReliableCommandSender::new(
            transport.clone(),
            quick_policy(),
        ));

        let envelope = CommandEnvelope::new(DeviceId::from("dev-1"), DeviceCommand::StopCampaign);
        let err = sender.send(envelope).await.unwrap_err();
        assert!(matches!(err, FleetError::Timeout(_)));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stale_ack_is_dropped() {
        let sender = ReliableCommandSender::new(FlakyTransport::new(u32::MAX), quick_policy());
        // No pending command registered; must not panic
        sender.handle_ack(CommandAck::processed("cmd-unknown", DeviceId::from("dev-1")));
        assert_eq!(sender.pending_count(), 0);
    }
}
