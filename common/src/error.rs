//! Error types for the fxrelay service.

use std::time::Duration;

use crate::Currency;
use thiserror::Error;

/// Main error type for relay operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Inbound frame is not JSON or does not match the message schema.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Currency code is not known to the rate provider.
    #[error("Unsupported exchange rate conversion for {0}")]
    UnknownCurrency(Currency),

    /// Rate provider failed, timed out or returned an unusable response.
    #[error("Rate unavailable: {0}")]
    RateUnavailable(String),

    /// Backing cache store cannot be reached.
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Connection to the remote endpoint was lost.
    #[error("Transport dropped: {0}")]
    TransportDrop(String),

    /// Converted amount does not fit in a decimal.
    #[error("Converted amount out of range for {0}")]
    ConversionOverflow(Currency),

    /// No inbound frame arrived within the liveness window.
    #[error("No frame received within {0:?}")]
    WatchdogTimeout(Duration),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unclassified internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Failure that only affects the request being processed.
    pub fn is_request_scoped(&self) -> bool {
        matches!(
            self,
            RelayError::MalformedFrame(_)
                | RelayError::UnknownCurrency(_)
                | RelayError::RateUnavailable(_)
                | RelayError::CacheUnavailable(_)
                | RelayError::ConversionOverflow(_)
        )
    }

    /// Failure that triggers the reconnect state machine.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            RelayError::TransportDrop(_) | RelayError::WatchdogTimeout(_)
        )
    }

    /// Failure that should stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Configuration(_) | RelayError::Internal(_)
        )
    }

    /// Get error code for logs and metrics.
    pub fn error_code(&self) -> &'static str {
        match self {
            RelayError::MalformedFrame(_) => "MALFORMED_FRAME",
            RelayError::UnknownCurrency(_) => "UNKNOWN_CURRENCY",
            RelayError::RateUnavailable(_) => "RATE_UNAVAILABLE",
            RelayError::CacheUnavailable(_) => "CACHE_UNAVAILABLE",
            RelayError::ConversionOverflow(_) => "CONVERSION_OVERFLOW",
            RelayError::TransportDrop(_) => "TRANSPORT_DROP",
            RelayError::WatchdogTimeout(_) => "WATCHDOG_TIMEOUT",
            RelayError::Configuration(_) => "CONFIGURATION_ERROR",
            RelayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
