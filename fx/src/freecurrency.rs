//! FreecurrencyAPI client.
//!
//! The API quotes historical rates at one-day granularity relative to a base
//! currency: `{"data": {"2021-01-01": {"USD": 1.2271, ...}}}` means one unit
//! of the base buys 1.2271 USD. We request the table with our quote currency
//! as the API's base and invert every entry.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use fxrelay_common::Currency;
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{FxError, FxResult};
use crate::provider::{DailyRates, RateProvider};

const MAX_LOGGED_BODY: usize = 512;

/// Rate provider backed by FreecurrencyAPI.
#[derive(Clone)]
pub struct FreeCurrencyApiProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl FreeCurrencyApiProvider {
    /// Create a client for `base_url` (e.g. `https://api.freecurrencyapi.com/v1`).
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> FxResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| FxError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl RateProvider for FreeCurrencyApiProvider {
    fn name(&self) -> &str {
        "freecurrencyapi"
    }

    async fn fetch_rates(&self, quote: &Currency, date: NaiveDate) -> FxResult<DailyRates> {
        let url = self.url("/historical");
        let date_str = date.format("%Y-%m-%d").to_string();

        info!(url = %url, base_currency = %quote, date = %date_str, "Fetching rates");

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("base_currency", quote.code()),
                ("date", date_str.as_str()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FxError::RateUnavailable(format!("GET {} timed out", url))
                } else {
                    FxError::RateUnavailable(format!("GET {} failed: {}", url, e))
                }
            })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| FxError::RateUnavailable(format!("GET {} body: {}", url, e)))?;

        info!(
            url = %url,
            status = %status,
            body = %truncate(&body, MAX_LOGGED_BODY),
            "Received rates response"
        );

        if !status.is_success() {
            return Err(FxError::RateUnavailable(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        parse_historical(&body, quote, date)
    }
}

/// Turn a `/historical` body into a table of `CUR → quote` rates.
fn parse_historical(body: &str, quote: &Currency, date: NaiveDate) -> FxResult<DailyRates> {
    let expected = || {
        FxError::MalformedResponse(format!(
            "expected {{\"data\": {{<date>: {{<currency>: <rate>}}}}}}, got {}",
            truncate(body, MAX_LOGGED_BODY)
        ))
    };

    let json: Value = serde_json::from_str(body).map_err(|_| expected())?;
    let (_, table) = json
        .get("data")
        .and_then(Value::as_object)
        .and_then(|days| days.iter().next())
        .ok_or_else(expected)?;
    let table = table.as_object().ok_or_else(expected)?;

    let mut rates = DailyRates::new(quote.clone(), date);
    for (code, value) in table {
        let Some(per_quote) = value.as_f64().and_then(|_| decimal_from_json(value)) else {
            warn!(currency = %code, "Skipping non-numeric rate");
            continue;
        };

        // One quote unit buys `per_quote` of `code`; we need the price of one `code`.
        match Decimal::ONE.checked_div(per_quote) {
            Some(rate) if per_quote > Decimal::ZERO => {
                rates.rates.insert(Currency::new(code.as_str()), rate);
            }
            _ => warn!(currency = %code, rate = %per_quote, "Skipping unusable rate"),
        }
    }

    debug!(quote = %quote, date = %date, currencies = rates.len(), "Parsed rate table");
    Ok(rates)
}

fn decimal_from_json(value: &Value) -> Option<Decimal> {
    if let Some(i) = value.as_i64() {
        return Some(Decimal::from(i));
    }
    let text = value.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
