//! Sample conversion requests.

use chrono::Duration;
use fxrelay_common::{format_wire_timestamp, Currency, Timestamp};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::json;

/// First id handed out.
pub const FIRST_REQUEST_ID: i64 = 730;

/// Produces requests dated at random around an anchor instant.
pub struct RequestGenerator<R> {
    rng: R,
    anchor: Timestamp,
    spread: Duration,
    currencies: Vec<Currency>,
    next_id: i64,
}

impl<R: Rng> RequestGenerator<R> {
    /// Dates fall within `spread` either side of `anchor`. An empty currency
    /// list falls back to USD.
    pub fn new(rng: R, anchor: Timestamp, spread: Duration, currencies: Vec<Currency>) -> Self {
        let currencies = if currencies.is_empty() {
            vec![Currency::usd()]
        } else {
            currencies
        };

        Self {
            rng,
            anchor,
            spread,
            currencies,
            next_id: FIRST_REQUEST_ID,
        }
    }

    /// Next request as a JSON text frame.
    pub fn next_request(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;

        let spread = self.spread.num_seconds().abs();
        let offset = Duration::seconds(self.rng.gen_range(-spread..=spread));
        let date = self.anchor.checked_add_signed(offset).unwrap_or(self.anchor);

        let currency = self
            .currencies
            .choose(&mut self.rng)
            .map(Currency::code)
            .unwrap_or("USD");

        json!({
            "type": "message",
            "id": id,
            "payload": {
                "marketId": 123,
                "selectionId": 456,
                "odds": 1.5,
                "stake": 200.0,
                "currency": currency,
                "date": format_wire_timestamp(&date),
            }
        })
        .to_string()
    }
}
