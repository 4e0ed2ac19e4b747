//! Time utilities and constants for fxrelay.

use std::sync::Arc;

use chrono::{
    DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc,
};
use parking_lot::Mutex;

/// Protocol timing constants.
pub mod constants {
    use std::time::Duration;

    /// Outbound heartbeat interval (1 second).
    pub fn heartbeat_interval() -> Duration {
        Duration::from_secs(1)
    }

    /// Inbound silence tolerated before the connection is stale (2 seconds).
    pub fn heartbeat_timeout() -> Duration {
        Duration::from_secs(2)
    }

    /// Pause between reconnection attempts (2 seconds).
    pub fn reconnect_delay() -> Duration {
        Duration::from_secs(2)
    }

    /// Default rate cache TTL (1 hour).
    pub fn cache_ttl() -> Duration {
        Duration::from_secs(3600)
    }

    /// Default bound on a single rate store round trip (2 seconds).
    pub fn cache_timeout() -> Duration {
        Duration::from_secs(2)
    }

    /// Default TTL for replies waiting on a reconnect (30 seconds).
    pub fn retry_message_ttl() -> Duration {
        Duration::from_secs(30)
    }

    /// Default rate provider request timeout (10 seconds).
    pub fn provider_timeout() -> Duration {
        Duration::from_secs(10)
    }
}

/// A timestamp with timezone (always UTC for fxrelay).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Format a timestamp the way it travels on the wire: `2021-01-01T00:00:00.000Z`.
pub fn format_wire_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

const LOCAL_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Parse an ISO-8601 wire datetime, keeping the offset it was written in.
///
/// Besides RFC 3339 this accepts a bare date (midnight), minutes without
/// seconds, a space instead of `T`, and `±HH` or `±HHMM` offsets. A missing
/// offset means UTC.
pub fn parse_wire_datetime(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }

    let (local, offset) = split_offset(s)?;
    let naive = parse_local(local)?;
    offset.from_local_datetime(&naive).single()
}

/// Split a trailing `Z` or numeric offset off a datetime.
fn split_offset(s: &str) -> Option<(&str, FixedOffset)> {
    let utc = FixedOffset::east_opt(0)?;
    if let Some(local) = s.strip_suffix(['Z', 'z']) {
        return Some((local, utc));
    }

    // An offset can only follow the time; the date has dashes of its own.
    let time_start = s.find(['T', ' ']).map_or(s.len(), |i| i + 1);
    match s[time_start..].rfind(['+', '-']) {
        Some(i) => {
            let at = time_start + i;
            Some((&s[..at], parse_offset(&s[at..])?))
        }
        None => Some((s, utc)),
    }
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, digits) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    if !digits.bytes().all(|b| b.is_ascii_digit() || b == b':') {
        return None;
    }

    let (hours, minutes) = match (digits.len(), digits.find(':')) {
        (2, None) => (digits, "00"),
        (4, None) => digits.split_at(2),
        (5, Some(2)) => (&digits[..2], &digits[3..]),
        _ => return None,
    };
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn parse_local(s: &str) -> Option<NaiveDateTime> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0);
    }

    LOCAL_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        now()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.current.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.current.lock()
    }
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Clock used outside of tests.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
