//! Call state reconciliation
//!
//! Single source of truth for translating the heterogeneous event
//! vocabularies (native telephony states, legacy two-state mobile events,
//! dashboard-issued commands) into the canonical status taxonomy, and for
//! applying them to durable records idempotently.
//!
//! Events arrive over three independent channels and may be duplicated,
//! reordered, or lost. Two rules make that safe:
//!
//! - **Terminal is sticky**: once a record reaches `Ended`, no later
//!   non-terminal event can overwrite it, so the final observable status is
//!   order-independent once any terminal event has been seen.
//! - **Idempotent application**: re-applying the same terminal event is a
//!   no-op beyond a log line - no duration recomputation, no error from the
//!   duplicate mapper release.
//!
//! Unresolvable events (neither handle nor number known) are dropped with a
//! diagnostic; they are expected during races and never halt processing of
//! subsequent events.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::mapper::HandleMapper;
use crate::store::CallStore;
use crate::telephony::CallStateEvent;
use crate::types::{CallId, CallStatus};

/// Fold a native-layer state string into the canonical taxonomy
///
/// The table is fixed and case-insensitive. Unknown states default to
/// `Ringing` rather than being rejected, which keeps a record from getting
/// stuck when the native layer grows a new vocabulary word.
pub fn fold_native_state(state: &str) -> CallStatus {
    match state.to_ascii_lowercase().as_str() {
        "queued" => CallStatus::Queued,
        // Dial in progress; includes the legacy two-state "started" event
        "dialing" | "connecting" | "originating" | "started" | "call_started" => {
            CallStatus::Dialing
        }
        "ringing" | "alerting" => CallStatus::Ringing,
        "answered" | "active" | "connected" | "offhook" => CallStatus::Answered,
        // Every termination outcome lands on Ended; includes the legacy
        // two-state "ended" event
        "ended" | "call_ended" | "disconnected" | "disconnecting" | "idle" | "busy"
        | "failed" | "no_answer" | "noanswer" | "rejected" | "unreachable" => CallStatus::Ended,
        other => {
            debug!("Unknown native state '{}' folded to ringing", other);
            CallStatus::Ringing
        }
    }
}

/// What applying one event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Record transitioned to the given status
    Applied { record: CallId, status: CallStatus },
    /// Record already carries a terminal status; event ignored
    AlreadyTerminal { record: CallId },
    /// Status unchanged; nothing written
    Unchanged { record: CallId },
    /// Event referenced no known handle or number; dropped
    Dropped,
}

/// Applies state events to durable records
///
/// Callers serialize `apply` per device (the engine's event loop does
/// this); across devices reconcilers are independent.
pub struct CallStateReconciler {
    mapper: Arc<HandleMapper>,
    store: Arc<dyn CallStore>,
}

impl CallStateReconciler {
    pub fn new(mapper: Arc<HandleMapper>, store: Arc<dyn CallStore>) -> Self {
        Self { mapper, store }
    }

    /// Apply one state event
    ///
    /// Resolution failures and stale events come back as non-error
    /// outcomes; an `Err` here means the durable store itself failed.
    pub async fn apply(&self, event: &CallStateEvent) -> crate::error::Result<ReconcileOutcome> {
        // 1-2. Resolve through the mapper, number-promotion fallback included
        let record_id = match self
            .mapper
            .resolve_and_promote(&event.handle, &event.number)
        {
            Some(id) => id,
            None => {
                debug!(
                    "Dropping unresolvable {} event for handle {} / number {} (source: {})",
                    event.state, event.handle, event.number, event.source
                );
                return Ok(ReconcileOutcome::Dropped);
            }
        };

        let record = match self.store.get(&record_id).await? {
            Some(r) => r,
            None => {
                // Mapping outlived the record; drop the event and the map
                // entry so a recycled handle cannot land here again
                warn!(
                    "Mapping for handle {} points at missing record {}; releasing",
                    event.handle, record_id
                );
                self.mapper.release(&event.handle);
                return Ok(ReconcileOutcome::Dropped);
            }
        };

        // 3. Fold the native vocabulary into the canonical taxonomy
        let status = fold_native_state(&event.state);

        // Terminal is sticky: a landed terminal status is never overwritten
        if record.status.is_terminal() {
            debug!(
                "Record {} already ended; ignoring {} event from {}",
                record_id, event.state, event.source
            );
            return Ok(ReconcileOutcome::AlreadyTerminal { record: record_id });
        }

        if status == record.status {
            debug!(
                "Record {} already {}; no-op ({} via {})",
                record_id, status, event.state, event.source
            );
            return Ok(ReconcileOutcome::Unchanged { record: record_id });
        }

        // 6. First transition into Answered records the duration basis;
        // the store keeps the first write
        if status == CallStatus::Answered {
            self.store.set_answered_at(&record_id, event.timestamp).await?;
        }

        // 4. Duration only on terminal, only if the call was answered
        let duration_seconds = if status.is_terminal() {
            match record.answered_at {
                Some(answered_at) => {
                    let elapsed = (event.timestamp - answered_at).num_seconds();
                    elapsed.max(0) as u64
                }
                None => 0,
            }
        } else {
            0
        };

        // 5. Persist
        self.store
            .update_status(&record_id, status, duration_seconds)
            .await?;
        info!(
            "📞 Record {} {} -> {} ({} via {})",
            record_id, record.status, status, event.state, event.source
        );

        // 7. Terminal releases the handle so its recycling cannot bind a
        // new call to this finished record
        if status.is_terminal() {
            self.mapper.release(&event.handle);
        }

        Ok(ReconcileOutcome::Applied {
            record: record_id,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCallStore;
    use crate::telephony::EventSource;
    use crate::types::{CallRecord, NativeHandle};
    use chrono::{Duration as ChronoDuration, Utc};

    fn fixture() -> (Arc<HandleMapper>, Arc<InMemoryCallStore>, CallStateReconciler) {
        let mapper = Arc::new(HandleMapper::new());
        let store = Arc::new(InMemoryCallStore::new());
        let reconciler = CallStateReconciler::new(mapper.clone(), store.clone());
        (mapper, store, reconciler)
    }

    async fn seed_call(
        mapper: &HandleMapper,
        store: &InMemoryCallStore,
        handle: &str,
        number: &str,
    ) -> CallId {
        let record = CallRecord::queued(number, None);
        let id = record.id.clone();
        store.insert(record).await.unwrap();
        mapper.bind(NativeHandle::from(handle), id.clone());
        id
    }

    fn event(handle: &str, number: &str, state: &str) -> CallStateEvent {
        CallStateEvent::new(
            NativeHandle::from(handle),
            number,
            state,
            EventSource::NativeCallback,
        )
    }

    fn event_at(
        handle: &str,
        number: &str,
        state: &str,
        at: chrono::DateTime<Utc>,
    ) -> CallStateEvent {
        let mut e = event(handle, number, state);
        e.timestamp = at;
        e
    }

    #[test]
    fn fold_table_covers_the_vocabularies() {
        assert_eq!(fold_native_state("DIALING"), CallStatus::Dialing);
        assert_eq!(fold_native_state("Ringing"), CallStatus::Ringing);
        assert_eq!(fold_native_state("ACTIVE"), CallStatus::Answered);
        assert_eq!(fold_native_state("DISCONNECTED"), CallStatus::Ended);
        assert_eq!(fold_native_state("BUSY"), CallStatus::Ended);
        assert_eq!(fold_native_state("NO_ANSWER"), CallStatus::Ended);
        // Legacy two-state mobile events
        assert_eq!(fold_native_state("call_started"), CallStatus::Dialing);
        assert_eq!(fold_native_state("call_ended"), CallStatus::Ended);
        // Unknown states default to ringing, never rejected
        assert_eq!(fold_native_state("WOBBLING"), CallStatus::Ringing);
    }

    #[tokio::test]
    async fn terminal_status_is_sticky() {
        let (mapper, store, reconciler) = fixture();
        let id = seed_call(&mapper, &store, "h1", "+1555").await;

        reconciler.apply(&event("h1", "+1555", "DISCONNECTED")).await.unwrap();
        // Late non-terminal event from the poll channel
        let mut late = event("h1", "+1555", "RINGING");
        late.source = EventSource::Poll;
        // Mapping was released on terminal; re-bind to simulate the poll
        // event arriving through a still-cached handle mapping
        mapper.bind(NativeHandle::from("h1"), id.clone());
        let outcome = reconciler.apply(&late).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::AlreadyTerminal { record: id.clone() });
        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, CallStatus::Ended);
    }

    #[tokio::test]
    async fn duplicate_terminal_event_is_a_noop() {
        let (mapper, store, reconciler) = fixture();
        let id = seed_call(&mapper, &store, "h1", "+1555").await;

        let answered = Utc::now();
        let ended = answered + ChronoDuration::seconds(42);
        reconciler
            .apply(&event_at("h1", "+1555", "ACTIVE", answered))
            .await
            .unwrap();
        reconciler
            .apply(&event_at("h1", "+1555", "DISCONNECTED", ended))
            .await
            .unwrap();

        let first = store.get(&id).await.unwrap().unwrap();
        assert_eq!(first.duration_seconds, 42);

        // Same terminal event redelivered over the broadcast channel; the
        // mapping is already released so it resolves through nothing
        let mut dup = event_at("h1", "+1555", "DISCONNECTED", ended + ChronoDuration::seconds(9));
        dup.source = EventSource::Broadcast;
        let outcome = reconciler.apply(&dup).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Dropped);

        let second = store.get(&id).await.unwrap().unwrap();
        assert_eq!(second.duration_seconds, 42);
    }

    #[tokio::test]
    async fn duration_floors_to_whole_seconds() {
        let (mapper, store, reconciler) = fixture();
        let id = seed_call(&mapper, &store, "h1", "+1555").await;

        let answered = Utc::now();
        let ended = answered + ChronoDuration::milliseconds(65_700);
        reconciler
            .apply(&event_at("h1", "+1555", "ANSWERED", answered))
            .await
            .unwrap();
        reconciler
            .apply(&event_at("h1", "+1555", "ENDED", ended))
            .await
            .unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.duration_seconds, 65);
    }

    #[tokio::test]
    async fn unanswered_call_ends_with_zero_duration() {
        let (mapper, store, reconciler) = fixture();
        let id = seed_call(&mapper, &store, "h1", "+1555").await;

        reconciler.apply(&event("h1", "+1555", "RINGING")).await.unwrap();
        reconciler.apply(&event("h1", "+1555", "BUSY")).await.unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.status, CallStatus::Ended);
        assert_eq!(record.duration_seconds, 0);
    }

    #[tokio::test]
    async fn answer_timestamp_is_recorded_exactly_once() {
        let (mapper, store, reconciler) = fixture();
        let id = seed_call(&mapper, &store, "h1", "+1555").await;

        let first = Utc::now();
        reconciler
            .apply(&event_at("h1", "+1555", "ACTIVE", first))
            .await
            .unwrap();
        // A duplicate answered event with a later clock must not move the
        // duration basis
        reconciler
            .apply(&event_at("h1", "+1555", "ACTIVE", first + ChronoDuration::seconds(10)))
            .await
            .unwrap();
        reconciler
            .apply(&event_at(
                "h1",
                "+1555",
                "DISCONNECTED",
                first + ChronoDuration::seconds(30),
            ))
            .await
            .unwrap();

        let record = store.get(&id).await.unwrap().unwrap();
        assert_eq!(record.answered_at, Some(first));
        assert_eq!(record.duration_seconds, 30);
    }

    #[tokio::test]
    async fn unresolvable_event_is_dropped_not_errored() {
        let (_mapper, _store, reconciler) = fixture();
        let outcome = reconciler
            .apply(&event("ghost", "+10000", "RINGING"))
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Dropped);
    }

    #[tokio::test]
    async fn terminal_event_releases_the_handle() {
        let (mapper, store, reconciler) = fixture();
        seed_call(&mapper, &store, "h1", "+1555").await;
        assert_eq!(mapper.stats().bound_handles, 1);

        reconciler.apply(&event("h1", "+1555", "FAILED")).await.unwrap();
        assert_eq!(mapper.stats().bound_handles, 0);

        // Recycled handle binds cleanly to a fresh record
        let next = seed_call(&mapper, &store, "h1", "+1666").await;
        assert_eq!(mapper.resolve(&NativeHandle::from("h1")), Some(next));
    }

    #[tokio::test]
    async fn campaign_event_resolves_through_the_pending_bridge() {
        let (mapper, store, reconciler) = fixture();
        let record = CallRecord::queued("+1555", None);
        let id = record.id.clone();
        store.insert(record).await.unwrap();
        mapper.bind_by_number("+1555", id.clone());

        let outcome = reconciler.apply(&event("h7", "+1555", "DIALING")).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                record: id.clone(),
                status: CallStatus::Dialing
            }
        );
        // Promoted: later events resolve by handle
        assert_eq!(mapper.resolve(&NativeHandle::from("h7")), Some(id));
        assert_eq!(mapper.stats().pending_numbers, 0);
    }
}
