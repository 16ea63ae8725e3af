//! Error types for the Storage Node Watchdog
//!
//! Provides structured error types for the event source, drive registry,
//! self-test correlation, and message bus layers.

use thiserror::Error;

/// Unified error type for the watchdog
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Event Source Errors
    // =========================================================================
    #[error("Lost connection to event source: {0}")]
    ConnectionLost(String),

    #[error("Event source call failed: {0}")]
    EventSource(String),

    #[error("Unit query failed: {unit} - {reason}")]
    UnitQuery { unit: String, reason: String },

    #[error("Property subscription failed: {unit} - {reason}")]
    SubscriptionFailed { unit: String, reason: String },

    // =========================================================================
    // Drive / Self-Test Errors
    // =========================================================================
    #[error("Stable id not resolved for drive: {drive}")]
    StableIdUnresolved { drive: String },

    #[error("Malformed property {interface}.{property} on {object}")]
    MalformedProperty {
        object: String,
        interface: String,
        property: String,
    },

    #[error("Failed to start self-test on {drive}: {reason}")]
    SelfTestStart { drive: String, reason: String },

    // =========================================================================
    // Message Bus Errors
    // =========================================================================
    #[error("Message delivery to {handler} failed: {reason}")]
    BusDelivery { handler: String, reason: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action the reactor takes when an error reaches it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Stop the reactor and surface the error to the supervisor
    Terminate,
    /// Log the error and carry on with the next item
    LogAndContinue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::ConnectionLost(_) => ErrorAction::Terminate,
            _ => ErrorAction::LogAndContinue,
        }
    }

    /// Check if this error must stop the reactor
    pub fn is_fatal(&self) -> bool {
        matches!(self.action(), ErrorAction::Terminate)
    }

    pub(crate) fn malformed(object: &str, interface: &str, property: &str) -> Self {
        Error::MalformedProperty {
            object: object.to_string(),
            interface: interface.to_string(),
            property: property.to_string(),
        }
    }
}

/// Result type alias for the watchdog
pub type Result<T> = std::result::Result<T, Error>;
