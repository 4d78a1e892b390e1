use thiserror::Error;

/// Error types for dial-engine operations
///
/// Covers the failure modes of call orchestration: identifier mapping,
/// queue admission, campaign control, the durable call store, and the
/// native telephony boundary.
///
/// Mapping and reconciliation failures are expected under normal race
/// conditions between the three event channels and are recovered locally
/// (dropped and logged) rather than surfaced through these types; what
/// reaches a caller here is an orchestration-level failure.
///
/// # Examples
///
/// ```
/// use outdial_dial_engine::{DialEngineError, Result};
///
/// fn start_campaign() -> Result<()> {
///     Err(DialEngineError::campaign("listeners not ready"))
/// }
///
/// match start_campaign() {
///     Ok(_) => println!("campaign started"),
///     Err(DialEngineError::Campaign(msg)) => println!("campaign error: {}", msg),
///     Err(e) => println!("other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum DialEngineError {
    /// Identifier mapping errors
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Dial queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// Campaign orchestration errors
    ///
    /// Includes readiness timeouts before start and invalid phase
    /// transitions (starting a campaign while one is running).
    #[error("Campaign error: {0}")]
    Campaign(String),

    /// Native telephony boundary errors
    ///
    /// The platform telephony stack rejected an operation. Dial failures
    /// during admission are logged and absorbed by the queue; this variant
    /// surfaces only for operations the caller invoked directly.
    #[error("Telephony error: {0}")]
    Telephony(String),

    /// Durable call store errors
    #[error("Store error: {0}")]
    Store(String),

    /// Requested record or resource could not be located
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Configuration validation errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Errors from the fleet layer (command transport, device store)
    #[error("Fleet error: {0}")]
    Fleet(#[from] outdial_fleet_core::FleetError),

    /// Internal errors that indicate a bug rather than an operational failure
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for DialEngineError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl DialEngineError {
    /// Create a new Mapping error with the provided message
    pub fn mapping<S: Into<String>>(msg: S) -> Self {
        Self::Mapping(msg.into())
    }

    /// Create a new Queue error with the provided message
    pub fn queue<S: Into<String>>(msg: S) -> Self {
        Self::Queue(msg.into())
    }

    /// Create a new Campaign error with the provided message
    pub fn campaign<S: Into<String>>(msg: S) -> Self {
        Self::Campaign(msg.into())
    }

    /// Create a new Telephony error with the provided message
    pub fn telephony<S: Into<String>>(msg: S) -> Self {
        Self::Telephony(msg.into())
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

    /// Create a new Configuration error with the provided message
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new Internal error with the provided message
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for dial-engine operations
pub type Result<T> = std::result::Result<T, DialEngineError>;
