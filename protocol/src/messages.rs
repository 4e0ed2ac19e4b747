//! Protocol frame types.
//!
//! Inbound frames are decoded by hand from a `serde_json::Value` so that a
//! bad frame still yields the best id we can recover and a readable list of
//! validation issues. Outbound frames are plain `Serialize` types.

use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use fxrelay_common::{
    format_wire_timestamp, parse_wire_datetime, Currency, RelayError, Timestamp,
};
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Encoded heartbeat frame.
pub const HEARTBEAT_JSON: &str = r#"{"type":"heartbeat"}"#;

/// Prefix of every error reply sent to the peer.
pub const ERROR_PREFIX: &str = "Unable to convert stake. Error:";

const KNOWN_PAYLOAD_FIELDS: [&str; 6] = [
    "marketId",
    "selectionId",
    "odds",
    "stake",
    "currency",
    "date",
];

/// Frame sent to the remote endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    /// Liveness signal.
    Heartbeat,
    /// Successful conversion reply.
    Message {
        id: i64,
        payload: ConversionPayload,
    },
    /// Failed request reply. `id` is `null` when none could be recovered.
    Error {
        id: Option<i64>,
        message: String,
    },
}

impl Frame {
    /// Build an error reply for a request.
    pub fn error(id: Option<i64>, reason: impl std::fmt::Display) -> Self {
        Frame::Error {
            id,
            message: format!("{} {}", ERROR_PREFIX, reason),
        }
    }

    /// Request id this frame answers, if any.
    pub fn correlation_id(&self) -> Option<i64> {
        match self {
            Frame::Heartbeat => None,
            Frame::Message { id, .. } => Some(*id),
            Frame::Error { id, .. } => *id,
        }
    }

    /// Encode as a JSON text frame.
    pub fn encode(&self) -> Result<String, RelayError> {
        serde_json::to_string(self).map_err(|e| RelayError::Internal(e.to_string()))
    }
}

/// Conversion payload shared by requests and success replies.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionPayload {
    pub market_id: i64,
    pub selection_id: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub odds: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub stake: Decimal,
    pub currency: Currency,
    #[serde(serialize_with = "serialize_timestamp")]
    pub date: Timestamp,
    /// Any further payload fields, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn serialize_timestamp<S: Serializer>(ts: &Timestamp, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_wire_timestamp(ts))
}

/// A validated conversion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub id: i64,
    pub payload: ConversionPayload,
    /// Day whose rates apply: the request date in its own offset.
    pub rate_date: NaiveDate,
}

impl ConversionRequest {
    /// Build the success reply: stake in Euros, stamped with `converted_at`.
    pub fn into_response(self, stake_eur: Decimal, converted_at: Timestamp) -> Frame {
        Frame::Message {
            id: self.id,
            payload: ConversionPayload {
                stake: stake_eur,
                currency: Currency::eur(),
                date: converted_at,
                ..self.payload
            },
        }
    }
}

/// Decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Heartbeat,
    Request(ConversionRequest),
}

/// Inbound frame that could not be turned into a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct FrameError {
    /// Best-effort id recovered from the frame.
    pub id: Option<i64>,
    pub reason: String,
}

impl FrameError {
    fn new(id: Option<i64>, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }

    /// Error reply for the peer.
    pub fn to_frame(&self) -> Frame {
        Frame::error(self.id, &self.reason)
    }
}

impl From<FrameError> for RelayError {
    fn from(e: FrameError) -> Self {
        RelayError::MalformedFrame(e.reason)
    }
}

/// Decode an inbound text frame.
pub fn decode(text: &str) -> Result<Inbound, FrameError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|_| FrameError::new(None, "Message could not be decoded as JSON"))?;

    let id = recover_id(&value);

    match value.get("type").and_then(Value::as_str) {
        Some("heartbeat") => Ok(Inbound::Heartbeat),
        Some("message") => validate_request(&value, id).map(Inbound::Request),
        Some(other) => Err(FrameError::new(
            id,
            format!("Input validation issues - unsupported message type '{}'", other),
        )),
        None => Err(FrameError::new(
            id,
            "Input validation issues - type is required",
        )),
    }
}

/// Recover an id for error replies, accepting numeric strings as well.
fn recover_id(value: &Value) -> Option<i64> {
    let id = value.get("id")?;
    id.as_i64()
        .or_else(|| id.as_str().and_then(|s| s.trim().parse().ok()))
}

fn validate_request(value: &Value, recovered_id: Option<i64>) -> Result<ConversionRequest, FrameError> {
    let mut issues = Vec::new();

    let id = match value.get("id") {
        Some(v) => v.as_i64().or_else(|| {
            issues.push("id must be an integer".to_string());
            None
        }),
        None => {
            issues.push("id is required".to_string());
            None
        }
    };

    let Some(payload) = value.get("payload").and_then(Value::as_object) else {
        issues.push("payload must be an object".to_string());
        return Err(validation_error(recovered_id, issues));
    };

    let market_id = integer_field(payload, "marketId", &mut issues);
    let selection_id = integer_field(payload, "selectionId", &mut issues);
    let odds = decimal_field(payload, "odds", &mut issues);
    let stake = decimal_field(payload, "stake", &mut issues);
    let currency = currency_field(payload, &mut issues);
    let date = date_field(payload, &mut issues);

    let extra: Map<String, Value> = payload
        .iter()
        .filter(|(k, _)| !KNOWN_PAYLOAD_FIELDS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    match (id, market_id, selection_id, odds, stake, currency, date) {
        (
            Some(id),
            Some(market_id),
            Some(selection_id),
            Some(odds),
            Some(stake),
            Some(currency),
            Some(date),
        ) if issues.is_empty() => Ok(ConversionRequest {
            id,
            payload: ConversionPayload {
                market_id,
                selection_id,
                odds,
                stake,
                currency,
                date: date.with_timezone(&Utc),
                extra,
            },
            rate_date: date.date_naive(),
        }),
        _ => Err(validation_error(recovered_id, issues)),
    }
}

fn validation_error(id: Option<i64>, issues: Vec<String>) -> FrameError {
    FrameError::new(id, format!("Input validation issues - {}", issues.join("; ")))
}

fn integer_field(payload: &Map<String, Value>, name: &str, issues: &mut Vec<String>) -> Option<i64> {
    match payload.get(name) {
        Some(v) => v.as_i64().or_else(|| {
            issues.push(format!("{} must be an integer", name));
            None
        }),
        None => {
            issues.push(format!("{} is required", name));
            None
        }
    }
}

fn decimal_field(payload: &Map<String, Value>, name: &str, issues: &mut Vec<String>) -> Option<Decimal> {
    match payload.get(name) {
        Some(Value::Number(n)) => decimal_from_number(n).or_else(|| {
            issues.push(format!("{} is out of range", name));
            None
        }),
        Some(_) => {
            issues.push(format!("{} must be a number", name));
            None
        }
        None => {
            issues.push(format!("{} is required", name));
            None
        }
    }
}

fn currency_field(payload: &Map<String, Value>, issues: &mut Vec<String>) -> Option<Currency> {
    match payload.get("currency") {
        Some(Value::String(code)) => Currency::parse(code).ok().or_else(|| {
            issues.push("currency must be a 3-letter uppercase string".to_string());
            None
        }),
        Some(_) => {
            issues.push("currency must be a string".to_string());
            None
        }
        None => {
            issues.push("currency is required".to_string());
            None
        }
    }
}

fn date_field(
    payload: &Map<String, Value>,
    issues: &mut Vec<String>,
) -> Option<DateTime<FixedOffset>> {
    match payload.get("date") {
        Some(Value::String(s)) => parse_wire_datetime(s).or_else(|| {
            issues.push("date must be an ISO-8601 datetime".to_string());
            None
        }),
        Some(_) => {
            issues.push("date must be a string".to_string());
            None
        }
        None => {
            issues.push("date is required".to_string());
            None
        }
    }
}

/// Convert a JSON number to a decimal without going through f64 arithmetic.
fn decimal_from_number(n: &Number) -> Option<Decimal> {
    if let Some(i) = n.as_i64() {
        return Some(Decimal::from(i));
    }
    if let Some(u) = n.as_u64() {
        return Some(Decimal::from(u));
    }

    let text = n.to_string();
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    const REQUEST: &str = r#"{"type":"message","id":1,"payload":{"marketId":1,"selectionId":2,"odds":2.0,"stake":100,"currency":"USD","date":"2021-01-01T00:00:00.000Z"}}"#;

    fn decode_request(text: &str) -> ConversionRequest {
        match decode(text).unwrap() {
            Inbound::Request(req) => req,
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_heartbeat() {
        assert_eq!(decode(HEARTBEAT_JSON).unwrap(), Inbound::Heartbeat);
        assert_eq!(Frame::Heartbeat.encode().unwrap(), HEARTBEAT_JSON);
    }

    #[test]
    fn test_decode_request() {
        let req = decode_request(REQUEST);

        assert_eq!(req.id, 1);
        assert_eq!(req.payload.market_id, 1);
        assert_eq!(req.payload.selection_id, 2);
        assert_eq!(req.payload.odds, dec!(2.0));
        assert_eq!(req.payload.stake, dec!(100));
        assert_eq!(req.payload.currency, Currency::usd());
        assert_eq!(
            req.payload.date,
            Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap()
        );
        assert!(req.payload.extra.is_empty());
        assert_eq!(req.rate_date, NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
    }

    fn request_dated(date: &str) -> String {
        format!(
            r#"{{"type":"message","id":5,"payload":{{"marketId":1,"selectionId":2,"odds":2.0,"stake":100,"currency":"USD","date":"{}"}}}}"#,
            date
        )
    }

    #[test]
    fn test_lenient_iso_dates_accepted() {
        let cases = [
            ("2021-01-01", "2021-01-01T00:00:00.000Z"),
            ("2021-01-01T00:00Z", "2021-01-01T00:00:00.000Z"),
            ("2021-01-01T00:00:00+0200", "2020-12-31T22:00:00.000Z"),
        ];

        for (wire, expected) in cases {
            let req = decode_request(&request_dated(wire));
            assert_eq!(format_wire_timestamp(&req.payload.date), expected, "{}", wire);
        }
    }

    #[test]
    fn test_rate_date_is_local_calendar_day() {
        let req = decode_request(&request_dated("2021-01-01T00:30:00+02:00"));

        assert_eq!(req.rate_date, NaiveDate::from_ymd_opt(2021, 1, 1).unwrap());
        assert_eq!(
            req.payload.date,
            Utc.with_ymd_and_hms(2020, 12, 31, 22, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_unparseable_date_is_validation_issue() {
        let err = decode(&request_dated("18/05/2021")).unwrap_err();
        assert_eq!(err.id, Some(5));
        assert!(err.reason.contains("date must be an ISO-8601 datetime"));
    }

    #[test]
    fn test_decimal_precision_is_kept() {
        let req = decode_request(
            r#"{"type":"message","id":3,"payload":{"marketId":1,"selectionId":2,"odds":1.15,"stake":0.1,"currency":"GBP","date":"2021-01-01T00:00:00Z"}}"#,
        );
        assert_eq!(req.payload.stake, dec!(0.1));
        assert_eq!(req.payload.odds, dec!(1.15));
    }

    #[test]
    fn test_malformed_json_has_no_id() {
        let err = decode("{not json").unwrap_err();
        assert_eq!(err.id, None);

        let json: Value = serde_json::from_str(&err.to_frame().encode().unwrap()).unwrap();
        assert_eq!(json["type"], "error");
        assert!(json["id"].is_null());
        assert!(json["message"]
            .as_str()
            .unwrap()
            .contains("could not be decoded as JSON"));
    }

    #[test]
    fn test_validation_collects_issues_and_keeps_id() {
        let err = decode(
            r#"{"type":"message","id":7,"payload":{"marketId":"x","selectionId":2,"odds":2.0,"stake":"100","currency":"usd","date":"2021-01-01T00:00:00Z"}}"#,
        )
        .unwrap_err();

        assert_eq!(err.id, Some(7));
        assert!(err.reason.starts_with("Input validation issues - "));
        assert!(err.reason.contains("marketId must be an integer"));
        assert!(err.reason.contains("stake must be a number"));
        assert!(err.reason.contains("currency must be a 3-letter uppercase string"));
    }

    #[test]
    fn test_missing_payload_and_string_id() {
        let err = decode(r#"{"type":"message","id":"12"}"#).unwrap_err();
        assert_eq!(err.id, Some(12));
        assert!(err.reason.contains("id must be an integer"));
        assert!(err.reason.contains("payload must be an object"));
    }

    #[test]
    fn test_unknown_type() {
        let err = decode(r#"{"type":"subscribe","id":4}"#).unwrap_err();
        assert_eq!(err.id, Some(4));
        assert!(err.reason.contains("unsupported message type"));
    }

    #[test]
    fn test_response_preserves_payload_fields() {
        let mut req = decode_request(REQUEST);
        req.payload
            .extra
            .insert("note".to_string(), Value::String("vip".to_string()));

        let converted_at = Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap();
        let frame = req.into_response(dec!(90), converted_at);
        assert_eq!(frame.correlation_id(), Some(1));

        let json: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "message");
        assert_eq!(json["id"], 1);
        assert_eq!(json["payload"]["marketId"], 1);
        assert_eq!(json["payload"]["selectionId"], 2);
        assert_eq!(json["payload"]["odds"].as_f64(), Some(2.0));
        assert_eq!(json["payload"]["stake"].as_f64(), Some(90.0));
        assert_eq!(json["payload"]["currency"], "EUR");
        assert_eq!(json["payload"]["date"], "2024-03-04T05:06:07.000Z");
        assert_eq!(json["payload"]["note"], "vip");
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = Frame::error(Some(9), "Unsupported exchange rate conversion");
        let json: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();

        assert_eq!(json["type"], "error");
        assert_eq!(json["id"], 9);
        assert_eq!(
            json["message"],
            "Unable to convert stake. Error: Unsupported exchange rate conversion"
        );
    }
}
