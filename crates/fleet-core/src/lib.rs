//! # Outdial Fleet Core
//!
//! Device-fleet primitives for the outdial stack: the durable device model,
//! the dashboard ⇄ device command channel, bidirectional heartbeat liveness
//! monitoring, and the debounced active-calls projection writer.
//!
//! ## Overview
//!
//! A dashboard pairs mobile devices and drives outbound calling through
//! them. This crate owns everything on that boundary that is not about an
//! individual call:
//!
//! - **Device model**: [`Device`], [`DeviceStatus`] with the terminal
//!   `Unpaired` state, and the narrow [`DeviceStore`] persistence seam
//! - **Command channel**: JSON [`command::CommandEnvelope`]s for the
//!   dashboard command vocabulary, acknowledgements, and the
//!   [`command::ReliableCommandSender`] with bounded retry
//! - **Liveness**: [`heartbeat::HeartbeatMonitor`] implementing the
//!   ping/pong protocol with cross-validated offline declaration
//! - **Projections**: [`counter::ActiveCallsWriter`], a coalescing writer
//!   actor for the denormalized active-calls count
//!
//! Call-level orchestration (queues, reconciliation, campaigns) lives in
//! `outdial-dial-engine`, which builds on this crate.
//!
//! ## Quick Start
//!
//! ```
//! use outdial_fleet_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<()> {
//! let store = Arc::new(InMemoryDeviceStore::new());
//! store.upsert(Device::paired(DeviceId::from("device-7"))).await?;
//!
//! let online = store.list_online().await?;
//! assert_eq!(online.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod counter;
pub mod device;
pub mod error;
pub mod heartbeat;
pub mod store;

pub use counter::ActiveCallsWriter;
pub use device::{Device, DeviceId, DeviceStatus};
pub use error::{FleetError, Result};
pub use store::{DeviceStore, InMemoryDeviceStore};

/// Prelude module for convenient imports
///
/// ```
/// use outdial_fleet_core::prelude::*;
/// ```
pub mod prelude {
    //! Commonly used types for fleet management

    pub use crate::command::{
        AckStatus, CommandAck, CommandEnvelope, CommandTransport, DeviceCommand,
        ReliableCommandSender, RetryPolicy,
    };
    pub use crate::counter::ActiveCallsWriter;
    pub use crate::device::{Device, DeviceId, DeviceStatus};
    pub use crate::error::{FleetError, Result};
    pub use crate::heartbeat::{
        HeartbeatChannel, HeartbeatConfig, HeartbeatMonitor, Ping, Pong,
    };
    pub use crate::store::{DeviceStore, InMemoryDeviceStore};

    pub use chrono::{DateTime, Utc};
}
