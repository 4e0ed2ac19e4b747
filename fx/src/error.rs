//! FX error types.

use fxrelay_common::{Currency, RelayError};
use thiserror::Error;

/// Errors that can occur while resolving a rate or converting an amount.
#[derive(Debug, Clone, Error)]
pub enum FxError {
    /// Provider does not quote this currency.
    #[error("Unsupported exchange rate conversion for {0}")]
    UnknownCurrency(Currency),

    /// Provider call failed, timed out or returned a non-2xx status.
    #[error("Remote API exception: {0}")]
    RateUnavailable(String),

    /// Provider answered with a body we cannot interpret.
    #[error("Unknown format in remote API response: {0}")]
    MalformedResponse(String),

    /// Backing rate store cannot be reached.
    #[error("Rate store unavailable: {0}")]
    CacheUnavailable(String),

    /// Converted amount does not fit in a decimal.
    #[error("Converted amount out of range for {0}")]
    ConversionOverflow(Currency),

    /// Client or store could not be constructed from its settings.
    #[error("Invalid FX configuration: {0}")]
    Configuration(String),
}

impl From<FxError> for RelayError {
    fn from(e: FxError) -> Self {
        match e {
            FxError::UnknownCurrency(currency) => RelayError::UnknownCurrency(currency),
            FxError::RateUnavailable(_) | FxError::MalformedResponse(_) => {
                RelayError::RateUnavailable(e.to_string())
            }
            FxError::CacheUnavailable(reason) => RelayError::CacheUnavailable(reason),
            FxError::ConversionOverflow(currency) => RelayError::ConversionOverflow(currency),
            FxError::Configuration(reason) => RelayError::Configuration(reason),
        }
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
