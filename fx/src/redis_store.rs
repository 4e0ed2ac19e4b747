//! Redis-backed rate store.
//!
//! Each daily table is a Redis hash `{key} -> {currency: rate}` with a native
//! `EXPIRE`, so expiry is enforced by the server. Every round trip is bounded
//! by the store timeout; a server that accepts connections but never answers
//! counts as unavailable.

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use fxrelay_common::Currency;
use redis::aio::MultiplexedConnection;
use redis::Client;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{FxError, FxResult};
use crate::provider::DailyRates;
use crate::store::{Lookup, RateStore};

/// Rate store backed by a Redis server.
pub struct RedisRateStore {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    timeout: Duration,
}

impl RedisRateStore {
    /// Create a store for `url` whose connects and commands each give up
    /// after `timeout`. The connection is opened lazily, so an unreachable
    /// server only surfaces as `CacheUnavailable` on use.
    pub fn new(url: &str, timeout: Duration) -> FxResult<Self> {
        if timeout.is_zero() {
            return Err(FxError::Configuration(
                "Redis timeout cannot be zero".to_string(),
            ));
        }

        let client = Client::open(url)
            .map_err(|e| FxError::Configuration(format!("invalid Redis URL: {}", e)))?;

        Ok(Self {
            client,
            connection: Mutex::new(None),
            timeout,
        })
    }

    async fn connection(&self) -> FxResult<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = match timeout(self.timeout, self.client.get_multiplexed_async_connection()).await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(FxError::CacheUnavailable(e.to_string())),
            Err(_) => {
                warn!(timeout = ?self.timeout, "Timed out connecting to Redis");
                return Err(FxError::CacheUnavailable(format!(
                    "connect timed out after {:?}",
                    self.timeout
                )));
            }
        };
        debug!("Connected to Redis");

        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Run one command round trip under the store timeout.
    async fn bounded<T, F>(&self, command: F) -> FxResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.timeout, command).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => Err(self.reset(e.to_string()).await),
            Err(_) => Err(self
                .reset(format!("command timed out after {:?}", self.timeout))
                .await),
        }
    }

    /// Forget the cached connection after a failure so the next call reconnects.
    async fn reset(&self, reason: String) -> FxError {
        warn!(error = %reason, "Redis command failed, dropping connection");
        *self.connection.lock().await = None;
        FxError::CacheUnavailable(reason)
    }
}

#[async_trait]
impl RateStore for RedisRateStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn lookup(&self, key: &str, base: &Currency) -> FxResult<Lookup> {
        let mut conn = self.connection().await?;

        let (rate, table_exists): (Option<String>, bool) = self
            .bounded(
                redis::pipe()
                    .hget(key, base.code())
                    .exists(key)
                    .query_async(&mut conn),
            )
            .await?;

        match rate {
            Some(raw) => Decimal::from_str(&raw)
                .map(Lookup::Hit)
                .map_err(|e| FxError::CacheUnavailable(format!("corrupt rate {:?}: {}", raw, e))),
            None if table_exists => Ok(Lookup::MissingCurrency),
            None => Ok(Lookup::Miss),
        }
    }

    async fn store(&self, key: &str, rates: &DailyRates, ttl: Duration) -> FxResult<()> {
        if rates.is_empty() {
            // HSET with no fields is an error; an empty table is simply not cached.
            return Ok(());
        }

        let fields: Vec<(String, String)> = rates
            .rates
            .iter()
            .map(|(currency, rate)| (currency.code().to_string(), rate.to_string()))
            .collect();
        let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1);

        let mut conn = self.connection().await?;
        let () = self
            .bounded(
                redis::pipe()
                    .atomic()
                    .hset_multiple(key, &fields)
                    .ignore()
                    .expire(key, ttl_secs)
                    .ignore()
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }
}
