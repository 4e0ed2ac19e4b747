//! Rate provider trait and rate tables.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use fxrelay_common::Currency;
use rust_decimal::Decimal;

use crate::error::FxResult;

/// All rates into one quote currency for one day.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyRates {
    /// Currency every rate converts into.
    pub quote: Currency,
    /// Day the rates apply to.
    pub date: NaiveDate,
    /// Price of one unit of each base currency, in `quote`.
    pub rates: HashMap<Currency, Decimal>,
}

impl DailyRates {
    /// Create an empty table.
    pub fn new(quote: Currency, date: NaiveDate) -> Self {
        Self {
            quote,
            date,
            rates: HashMap::new(),
        }
    }

    /// Add a rate, builder style.
    pub fn with_rate(mut self, base: Currency, rate: Decimal) -> Self {
        self.rates.insert(base, rate);
        self
    }

    /// Rate for `base → quote`, if the table has one.
    pub fn rate_for(&self, base: &Currency) -> Option<Decimal> {
        if *base == self.quote {
            return Some(Decimal::ONE);
        }
        self.rates.get(base).copied()
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Source of exchange rates.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Fetch every rate into `quote` that applies on `date`.
    async fn fetch_rates(&self, quote: &Currency, date: NaiveDate) -> FxResult<DailyRates>;
}

/// Mock rate provider for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateProvider {
    name: String,
    rates: dashmap::DashMap<fxrelay_common::CurrencyPair, Decimal>,
    calls: std::sync::atomic::AtomicUsize,
    dates: std::sync::Mutex<Vec<NaiveDate>>,
    failing: std::sync::atomic::AtomicBool,
    latency: Option<std::time::Duration>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateProvider {
    /// Create a new mock provider.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: dashmap::DashMap::new(),
            calls: std::sync::atomic::AtomicUsize::new(0),
            dates: std::sync::Mutex::new(Vec::new()),
            failing: std::sync::atomic::AtomicBool::new(false),
            latency: None,
        }
    }

    /// Delay every fetch by `latency`.
    pub fn with_latency(mut self, latency: std::time::Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Set a rate for a currency pair.
    pub fn set_rate(&self, pair: fxrelay_common::CurrencyPair, rate: Decimal) {
        self.rates.insert(pair, rate);
    }

    /// Make every fetch fail with `RateUnavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// Number of fetches made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Dates asked for, in call order.
    pub fn requested_dates(&self) -> Vec<NaiveDate> {
        self.dates.lock().map(|dates| dates.clone()).unwrap_or_default()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateProvider for MockRateProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_rates(&self, quote: &Currency, date: NaiveDate) -> FxResult<DailyRates> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Ok(mut dates) = self.dates.lock() {
            dates.push(date);
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(crate::error::FxError::RateUnavailable(format!(
                "{} is failing",
                self.name
            )));
        }

        let mut table = DailyRates::new(quote.clone(), date);
        for entry in self.rates.iter().filter(|e| e.key().quote == *quote) {
            table.rates.insert(entry.key().base.clone(), *entry.value());
        }
        Ok(table)
    }
}
