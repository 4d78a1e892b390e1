use thiserror::Error;

/// Error types for fleet management operations
///
/// Covers the failure modes of the device-facing side of the system: command
/// transport, device lookups, heartbeat bookkeeping, and the persistent
/// device store.
///
/// # Examples
///
/// ```
/// use outdial_fleet_core::{FleetError, Result};
///
/// fn send_command() -> Result<()> {
///     Err(FleetError::transport("broadcast channel unavailable"))
/// }
///
/// match send_command() {
///     Ok(_) => println!("command delivered"),
///     Err(FleetError::Transport(msg)) => println!("transport error: {}", msg),
///     Err(e) => println!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum FleetError {
    /// Command transport errors
    ///
    /// The broadcast channel or reliable command queue failed to deliver a
    /// message. Eligible for the bounded retry policy before being surfaced.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Device store errors
    ///
    /// Failures reading or writing persisted device records.
    #[error("Store error: {0}")]
    Store(String),

    /// Requested device (or other resource) could not be located
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation timed out
    ///
    /// Command acknowledgement or pong response did not arrive within the
    /// configured window.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Invalid input validation errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration validation errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal errors that indicate a bug rather than an operational failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FleetError {
    /// Create a new Transport error with the provided message
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new Store error with the provided message
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    /// Create a new NotFound error with the provided message
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Timeout error with the provided message
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a new InvalidInput error with the provided message
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a new Configuration error with the provided message
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new Internal error with the provided message
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for fleet operations
pub type Result<T> = std::result::Result<T, FleetError>;
