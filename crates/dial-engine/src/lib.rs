//! # Outdial Dial Engine
//!
//! Per-device call orchestration for the outdial stack: identifier
//! mapping between ephemeral native handles and durable call records,
//! bounded-concurrency dial admission, idempotent call state
//! reconciliation across three event channels, and outbound campaign
//! control with a defensive stop sweep.
//!
//! ## Overview
//!
//! The platform telephony stack reports call state through a native
//! callback, a peer-to-peer broadcast, and a polling fallback - three
//! channels carrying the same facts with duplication and reordering. The
//! engine funnels all of them through one serialized per-device loop:
//!
//! - **[`mapper::HandleMapper`]**: dual-keyed registry bridging the gap
//!   between record creation and native handle assignment
//! - **[`queue::DialQueue`]**: FIFO admission with a fixed concurrency
//!   cap and debounced backfill
//! - **[`reconciler::CallStateReconciler`]**: folds native vocabularies
//!   into the canonical `queued → dialing → ringing → answered → ended`
//!   taxonomy; terminal is sticky, application is idempotent
//! - **[`campaign::CampaignOrchestrator`]**: batch dialing with
//!   pre-created records, a readiness gate, and the stop sweep that never
//!   leaves a non-terminal record behind
//! - **[`engine::DeviceEngine`]**: wires the above and runs the event
//!   loop; one engine per paired device
//!
//! Fleet-level concerns (device model, command channel, heartbeat) live
//! in `outdial-fleet-core`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use outdial_dial_engine::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(telephony: Arc<dyn NativeTelephony>) -> Result<()> {
//! let call_store = Arc::new(SqliteCallStore::new("sqlite://calls.db").await?);
//! let device_store = Arc::new(outdial_fleet_core::InMemoryDeviceStore::new());
//!
//! let engine = DeviceEngine::spawn(
//!     outdial_fleet_core::DeviceId::from("device-7"),
//!     DialEngineConfig::default(),
//!     telephony,
//!     call_store,
//!     device_store,
//! )?;
//! engine.submit(EngineEvent::CampaignCompleted);
//! # Ok(())
//! # }
//! ```

pub mod campaign;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod mapper;
pub mod queue;
pub mod reconciler;
pub mod store;
pub mod telephony;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::DialEngineConfig;
pub use engine::{DeviceEngine, EngineEvent};
pub use error::{DialEngineError, Result};

/// Prelude module for convenient imports
///
/// ```
/// use outdial_dial_engine::prelude::*;
/// ```
pub mod prelude {
    //! Commonly used types for call orchestration

    pub use crate::campaign::{CampaignOrchestrator, CampaignPhase};
    pub use crate::config::DialEngineConfig;
    pub use crate::database::SqliteCallStore;
    pub use crate::engine::{DeviceEngine, EngineEvent};
    pub use crate::error::{DialEngineError, Result};
    pub use crate::mapper::HandleMapper;
    pub use crate::queue::{DialQueue, DialRequest, QueueStats};
    pub use crate::reconciler::{fold_native_state, CallStateReconciler, ReconcileOutcome};
    pub use crate::store::{CallStore, InMemoryCallStore};
    pub use crate::telephony::{CallStateEvent, EventSource, NativeTelephony};
    pub use crate::types::{
        CallId, CallRecord, CallStatus, CampaignProgress, CampaignSummary, NativeHandle,
    };
}
