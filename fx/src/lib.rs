//! fxrelay FX
//!
//! Resolves exchange rates and converts stakes to Euros.
//!
//! # Features
//!
//! - Pluggable rate providers, with a FreecurrencyAPI HTTP client
//! - Daily rate tables cached with a TTL in Redis or in memory
//! - Graceful degradation to direct provider calls when the cache is down
//! - Decimal-exact conversion
//!
//! # Example
//!
//! ```rust,ignore
//! use fxrelay_fx::{Converter, RateCache, RateCacheConfig, MemoryRateStore, FreeCurrencyApiProvider};
//!
//! let provider = Arc::new(FreeCurrencyApiProvider::new(url, key, timeout)?);
//! let store = Arc::new(MemoryRateStore::new(system_clock()));
//! let cache = Arc::new(RateCache::new(store, provider, RateCacheConfig::default()));
//! let converter = Converter::new(cache, system_clock());
//!
//! let conversion = converter.convert(dec!(100), &Currency::usd(), now().date_naive()).await?;
//! ```

pub mod cache;
pub mod conversion;
pub mod converter;
pub mod error;
pub mod freecurrency;
pub mod provider;
pub mod redis_store;
pub mod store;

pub use cache::{CacheStats, RateCache, RateCacheConfig};
pub use conversion::Conversion;
pub use converter::{Converter, STAKE_DECIMAL_PLACES};
pub use error::{FxError, FxResult};
pub use freecurrency::FreeCurrencyApiProvider;
pub use provider::{DailyRates, RateProvider};
pub use redis_store::RedisRateStore;
pub use store::{Lookup, MemoryRateStore, RateStore};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateProvider;
