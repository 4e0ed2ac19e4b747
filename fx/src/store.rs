//! Rate table storage with TTL support.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use fxrelay_common::{Currency, SharedClock, Timestamp};
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::FxResult;
use crate::provider::DailyRates;

/// Outcome of a store lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// The table is cached and quotes the currency.
    Hit(Decimal),
    /// The table is cached but does not quote the currency.
    MissingCurrency,
    /// No live table under the key.
    Miss,
}

/// Key/value store holding daily rate tables.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Get the store name.
    fn name(&self) -> &str;

    /// Look up the rate for `base` in the table stored under `key`.
    async fn lookup(&self, key: &str, base: &Currency) -> FxResult<Lookup>;

    /// Store a table under `key`, expiring after `ttl`.
    async fn store(&self, key: &str, rates: &DailyRates, ttl: Duration) -> FxResult<()>;
}

/// Stored table.
#[derive(Debug, Clone)]
struct StoredTable {
    rates: HashMap<Currency, Decimal>,
    expires_at: Timestamp,
}

impl StoredTable {
    fn is_valid(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}

/// In-process rate store with application-enforced TTL.
pub struct MemoryRateStore {
    tables: DashMap<String, StoredTable>,
    clock: SharedClock,
}

impl MemoryRateStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            tables: DashMap::new(),
            clock,
        }
    }

    /// Get the number of tables held, live or expired.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Check if store is empty.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Evict expired tables. Runs on every store, so the map never holds
    /// more than the tables written within one TTL.
    pub fn evict_expired(&self) {
        let now = self.clock.now();
        let before = self.tables.len();
        self.tables.retain(|_, table| table.is_valid(now));

        let evicted = before.saturating_sub(self.tables.len());
        if evicted > 0 {
            debug!(evicted, "Evicted expired tables");
        }
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn lookup(&self, key: &str, base: &Currency) -> FxResult<Lookup> {
        let now = self.clock.now();

        if let Some(table) = self.tables.get(key) {
            if table.is_valid(now) {
                return Ok(match table.rates.get(base) {
                    Some(rate) => Lookup::Hit(*rate),
                    None => Lookup::MissingCurrency,
                });
            }

            debug!(key = %key, "Stored table expired");
            drop(table);
            self.tables.remove(key);
        }

        Ok(Lookup::Miss)
    }

    async fn store(&self, key: &str, rates: &DailyRates, ttl: Duration) -> FxResult<()> {
        self.evict_expired();

        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(Timestamp::MAX_UTC);

        self.tables.insert(
            key.to_string(),
            StoredTable {
                rates: rates.rates.clone(),
                expires_at,
            },
        );
        Ok(())
    }
}
