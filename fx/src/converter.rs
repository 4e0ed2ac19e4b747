//! Euro converter.

use std::sync::Arc;

use chrono::NaiveDate;
use fxrelay_common::{Currency, CurrencyPair, SharedClock};
use rust_decimal::Decimal;
use tracing::{info, instrument};

use crate::cache::RateCache;
use crate::conversion::Conversion;
use crate::error::{FxError, FxResult};

/// Fractional digits kept on converted stakes.
pub const STAKE_DECIMAL_PLACES: u32 = 5;

/// Converts stakes into Euros using cached rates.
pub struct Converter {
    cache: Arc<RateCache>,
    clock: SharedClock,
}

impl Converter {
    /// Create a new converter.
    pub fn new(cache: Arc<RateCache>, clock: SharedClock) -> Self {
        Self { cache, clock }
    }

    /// Convert `amount` in `currency` to Euros at the rate published for `on`.
    ///
    /// Euro amounts are returned untouched, without consulting the cache.
    #[instrument(skip(self), fields(currency = %currency, amount = %amount, on = %on))]
    pub async fn convert(
        &self,
        amount: Decimal,
        currency: &Currency,
        on: NaiveDate,
    ) -> FxResult<Conversion> {
        if currency.is_eur() {
            return Ok(Conversion {
                input: amount,
                currency: currency.clone(),
                rate: Decimal::ONE,
                output: amount,
                executed_at: self.clock.now(),
            });
        }

        let pair = CurrencyPair::to_eur(currency.clone());
        let rate = self.cache.get(&pair, on).await?;

        let output = amount
            .checked_mul(rate)
            .ok_or_else(|| FxError::ConversionOverflow(currency.clone()))?
            .round_dp(STAKE_DECIMAL_PLACES);

        let conversion = Conversion {
            input: amount,
            currency: currency.clone(),
            rate,
            output,
            executed_at: self.clock.now(),
        };

        info!(rate = %rate, output = %conversion.output, "Conversion completed");

        Ok(conversion)
    }
}
