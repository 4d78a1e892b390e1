//! Dashboard ⇄ device command channel
//!
//! Wire envelopes for dashboard-issued commands and their acknowledgements,
//! plus the reliable sender that retries delivery over the best-effort
//! broadcast transport.

pub mod envelope;
pub mod sender;

pub use envelope::{AckStatus, CommandAck, CommandEnvelope, DeviceCommand};
pub use sender::{CommandTransport, ReliableCommandSender, RetryPolicy};
