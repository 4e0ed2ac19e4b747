//! Read-through rate cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use dashmap::DashMap;
use fxrelay_common::{constants, Currency, CurrencyPair};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::error::{FxError, FxResult};
use crate::provider::{DailyRates, RateProvider};
use crate::store::{Lookup, RateStore};

/// Configuration for rate cache.
#[derive(Debug, Clone)]
pub struct RateCacheConfig {
    /// TTL applied to every stored table.
    pub ttl: Duration,
    /// Prefix of store keys.
    pub key_prefix: String,
}

impl Default for RateCacheConfig {
    fn default() -> Self {
        Self {
            ttl: constants::cache_ttl(),
            key_prefix: "fx_rates".to_string(),
        }
    }
}

/// Cache counters.
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    bypasses: AtomicU64,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered by the store.
    pub hits: u64,
    /// Lookups that went to the provider.
    pub misses: u64,
    /// Store failures that were bypassed.
    pub bypasses: u64,
}

/// Rate cache in front of a provider.
///
/// Tables are keyed by quote currency and day. When the store is down the
/// cache degrades to calling the provider directly.
pub struct RateCache {
    store: Arc<dyn RateStore>,
    provider: Arc<dyn RateProvider>,
    config: RateCacheConfig,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    counters: Counters,
}

impl RateCache {
    /// Create a new rate cache.
    pub fn new(
        store: Arc<dyn RateStore>,
        provider: Arc<dyn RateProvider>,
        config: RateCacheConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
            inflight: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Get the `base → quote` rate that applies on `date`.
    #[instrument(skip(self), fields(pair = %pair, date = %date))]
    pub async fn get(&self, pair: &CurrencyPair, date: NaiveDate) -> FxResult<Decimal> {
        if pair.is_identity() {
            return Ok(Decimal::ONE);
        }

        let key = self.cache_key(&pair.quote, date);

        if let Some(answer) = self.cached(&key, &pair.base).await {
            return answer;
        }

        // Coalesce concurrent misses for the same table.
        let gate = self.inflight.entry(key.clone()).or_default().clone();
        let _guard = gate.lock().await;

        if let Some(answer) = self.cached(&key, &pair.base).await {
            return answer;
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(provider = self.provider.name(), "Cache miss, fetching rates");

        // The gate stays up until the table is saved, so a caller arriving
        // mid-save waits and then reads from the store.
        let fetched = self.provider.fetch_rates(&pair.quote, date).await;
        if let Ok(table) = &fetched {
            self.save(&key, table).await;
        }
        self.inflight.remove(&key);
        let table = fetched?;

        table
            .rate_for(&pair.base)
            .ok_or_else(|| FxError::UnknownCurrency(pair.base.clone()))
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            bypasses: self.counters.bypasses.load(Ordering::Relaxed),
        }
    }

    /// Answer from the store, or `None` when the provider has to be asked.
    async fn cached(&self, key: &str, base: &Currency) -> Option<FxResult<Decimal>> {
        match self.store.lookup(key, base).await {
            Ok(Lookup::Hit(rate)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                Some(Ok(rate))
            }
            Ok(Lookup::MissingCurrency) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(Err(FxError::UnknownCurrency(base.clone())))
            }
            Ok(Lookup::Miss) => None,
            Err(e) => {
                self.counters.bypasses.fetch_add(1, Ordering::Relaxed);
                warn!(
                    store = self.store.name(),
                    error = %e,
                    "Rate store unavailable, bypassing cache"
                );
                None
            }
        }
    }

    async fn save(&self, key: &str, table: &DailyRates) {
        if let Err(e) = self.store.store(key, table, self.config.ttl).await {
            warn!(store = self.store.name(), key = %key, error = %e, "Failed to cache rates");
        }
    }

    fn cache_key(&self, quote: &Currency, date: NaiveDate) -> String {
        format!("{}:{}:{}", self.config.key_prefix, quote.code(), date.format("%Y-%m-%d"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockRateProvider;
    use crate::store::MemoryRateStore;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use fxrelay_common::ManualClock;
    use rust_decimal_macros::dec;

    struct UnreachableStore;

    #[async_trait]
    impl RateStore for UnreachableStore {
        fn name(&self) -> &str {
            "unreachable"
        }

        async fn lookup(&self, _key: &str, _base: &Currency) -> FxResult<Lookup> {
            Err(FxError::CacheUnavailable("connection refused".into()))
        }

        async fn store(&self, _key: &str, _rates: &DailyRates, _ttl: Duration) -> FxResult<()> {
            Err(FxError::CacheUnavailable("connection refused".into()))
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, 1).unwrap()
    }

    fn usd_eur() -> CurrencyPair {
        CurrencyPair::to_eur(Currency::usd())
    }

    fn setup(ttl_secs: u64) -> (RateCache, Arc<MockRateProvider>, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let provider = Arc::new(MockRateProvider::new("mock"));
        provider.set_rate(usd_eur(), dec!(0.9));

        let cache = RateCache::new(
            Arc::new(MemoryRateStore::new(Arc::new(clock.clone()))),
            provider.clone(),
            RateCacheConfig {
                ttl: Duration::from_secs(ttl_secs),
                ..Default::default()
            },
        );
        (cache, provider, clock)
    }

    #[tokio::test]
    async fn test_hit_within_ttl_skips_provider() {
        let (cache, provider, clock) = setup(60);

        assert_eq!(cache.get(&usd_eur(), day()).await.unwrap(), dec!(0.9));
        clock.advance(ChronoDuration::seconds(30));
        assert_eq!(cache.get(&usd_eur(), day()).await.unwrap(), dec!(0.9));

        assert_eq!(provider.call_count(), 1);
        assert_eq!(
            cache.stats(),
            CacheStats {
                hits: 1,
                misses: 1,
                bypasses: 0
            }
        );
    }

    #[tokio::test]
    async fn test_lookup_after_ttl_refetches() {
        let (cache, provider, clock) = setup(60);

        cache.get(&usd_eur(), day()).await.unwrap();
        clock.advance(ChronoDuration::seconds(61));
        provider.set_rate(usd_eur(), dec!(0.95));

        assert_eq!(cache.get(&usd_eur(), day()).await.unwrap(), dec!(0.95));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_tables_are_per_day() {
        let (cache, provider, _clock) = setup(60);
        let next_day = day().succ_opt().unwrap();

        cache.get(&usd_eur(), day()).await.unwrap();
        cache.get(&usd_eur(), next_day).await.unwrap();

        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_currency_answered_from_cached_table() {
        let (cache, provider, _clock) = setup(60);
        let xyz = CurrencyPair::to_eur(Currency::new("XYZ"));

        let first = cache.get(&xyz, day()).await.unwrap_err();
        assert!(matches!(first, FxError::UnknownCurrency(_)));

        cache.get(&usd_eur(), day()).await.unwrap();
        let second = cache.get(&xyz, day()).await.unwrap_err();
        assert!(matches!(second, FxError::UnknownCurrency(_)));

        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_is_not_cached() {
        let (cache, provider, _clock) = setup(60);
        provider.set_failing(true);

        let err = cache.get(&usd_eur(), day()).await.unwrap_err();
        assert!(matches!(err, FxError::RateUnavailable(_)));

        provider.set_failing(false);
        assert_eq!(cache.get(&usd_eur(), day()).await.unwrap(), dec!(0.9));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_store_outage_bypasses_to_provider() {
        let provider = Arc::new(MockRateProvider::new("mock"));
        provider.set_rate(usd_eur(), dec!(0.9));
        let cache = RateCache::new(
            Arc::new(UnreachableStore),
            provider.clone(),
            RateCacheConfig::default(),
        );

        assert_eq!(cache.get(&usd_eur(), day()).await.unwrap(), dec!(0.9));
        assert_eq!(cache.get(&usd_eur(), day()).await.unwrap(), dec!(0.9));

        assert_eq!(provider.call_count(), 2);
        assert!(cache.stats().bypasses >= 2);
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let provider =
            Arc::new(MockRateProvider::new("slow").with_latency(std::time::Duration::from_millis(50)));
        provider.set_rate(usd_eur(), dec!(0.9));
        let cache = RateCache::new(
            Arc::new(MemoryRateStore::new(Arc::new(clock))),
            provider.clone(),
            RateCacheConfig::default(),
        );

        let pair = usd_eur();
        let (a, b) = tokio::join!(cache.get(&pair, day()), cache.get(&pair, day()));

        assert_eq!(a.unwrap(), dec!(0.9));
        assert_eq!(b.unwrap(), dec!(0.9));
        assert_eq!(provider.call_count(), 1);
    }

    /// Memory store whose writes take a while to land.
    struct SlowWriteStore {
        inner: MemoryRateStore,
        delay: Duration,
    }

    #[async_trait]
    impl RateStore for SlowWriteStore {
        fn name(&self) -> &str {
            "slow-write"
        }

        async fn lookup(&self, key: &str, base: &Currency) -> FxResult<Lookup> {
            self.inner.lookup(key, base).await
        }

        async fn store(&self, key: &str, rates: &DailyRates, ttl: Duration) -> FxResult<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.store(key, rates, ttl).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_arriving_during_save_waits_for_it() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let provider = Arc::new(
            MockRateProvider::new("mock").with_latency(std::time::Duration::from_millis(10)),
        );
        provider.set_rate(usd_eur(), dec!(0.9));
        let cache = RateCache::new(
            Arc::new(SlowWriteStore {
                inner: MemoryRateStore::new(Arc::new(clock)),
                delay: Duration::from_millis(50),
            }),
            provider.clone(),
            RateCacheConfig::default(),
        );

        let pair = usd_eur();
        let late = async {
            // Lands after the fetch finished but before the save did.
            tokio::time::sleep(Duration::from_millis(20)).await;
            cache.get(&pair, day()).await
        };
        let (a, b) = tokio::join!(cache.get(&pair, day()), late);

        assert_eq!(a.unwrap(), dec!(0.9));
        assert_eq!(b.unwrap(), dec!(0.9));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(cache.stats().hits, 1);
        assert!(cache.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_releases_gate() {
        let (cache, provider, _clock) = setup(60);
        provider.set_failing(true);

        assert!(cache.get(&usd_eur(), day()).await.is_err());
        assert!(cache.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_identity_pair_needs_no_lookup() {
        let (cache, provider, _clock) = setup(60);
        let eur = CurrencyPair::to_eur(Currency::eur());

        assert_eq!(cache.get(&eur, day()).await.unwrap(), Decimal::ONE);
        assert_eq!(provider.call_count(), 0);
    }
}
