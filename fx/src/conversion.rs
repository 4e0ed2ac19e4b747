//! Conversion records.

use fxrelay_common::{Currency, Timestamp};
use rust_decimal::Decimal;

/// A completed conversion into Euros.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    /// Amount in the source currency.
    pub input: Decimal,
    /// Source currency.
    pub currency: Currency,
    /// Rate applied, `currency → EUR`.
    pub rate: Decimal,
    /// Amount in Euros.
    pub output: Decimal,
    /// When the conversion completed.
    pub executed_at: Timestamp,
}
