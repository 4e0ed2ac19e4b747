//! Buffer of replies awaiting a live connection.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use fxrelay_common::Timestamp;
use tracing::warn;

/// Encoded reply that could not be delivered yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryEntry {
    pub message: String,
    pub enqueued_at: Timestamp,
}

impl RetryEntry {
    fn age(&self, now: Timestamp) -> ChronoDuration {
        now.signed_duration_since(self.enqueued_at)
    }
}

/// FIFO of undelivered replies with a maximum age.
#[derive(Debug)]
pub struct RetryBuffer {
    entries: VecDeque<RetryEntry>,
    ttl: ChronoDuration,
}

impl RetryBuffer {
    /// Create an empty buffer that drops entries older than `ttl` on flush.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            ttl: ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX),
        }
    }

    /// Park a reply. `enqueued_at` is when the reply was produced.
    pub fn enqueue(&mut self, message: String, enqueued_at: Timestamp) {
        self.entries.push_back(RetryEntry {
            message,
            enqueued_at,
        });
    }

    /// Take every entry still young enough to send, oldest first.
    ///
    /// Returns the sendable entries and how many were dropped.
    pub fn flush(&mut self, now: Timestamp) -> (Vec<RetryEntry>, usize) {
        let mut sendable = Vec::with_capacity(self.entries.len());
        let mut dropped = 0;

        for entry in self.entries.drain(..) {
            let age = entry.age(now);
            if age <= self.ttl {
                sendable.push(entry);
            } else {
                dropped += 1;
                warn!(
                    age_ms = age.num_milliseconds(),
                    ttl_ms = self.ttl.num_milliseconds(),
                    message = %entry.message,
                    "Dropping undelivered reply past retry TTL"
                );
            }
        }

        (sendable, dropped)
    }

    /// Put entries back at the head of the queue, keeping their order and
    /// original timestamps.
    pub fn requeue_front<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = RetryEntry>,
        I::IntoIter: DoubleEndedIterator,
    {
        for entry in entries.into_iter().rev() {
            self.entries.push_front(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn secs(n: i64) -> ChronoDuration {
        ChronoDuration::seconds(n)
    }

    #[test]
    fn test_ttl_boundary() {
        let mut buffer = RetryBuffer::new(Duration::from_secs(30));
        buffer.enqueue("old".into(), t0() - secs(31));
        buffer.enqueue("edge".into(), t0() - secs(30));
        buffer.enqueue("young".into(), t0() - secs(29));

        let (sendable, dropped) = buffer.flush(t0());

        let messages: Vec<_> = sendable.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["edge", "young"]);
        assert_eq!(dropped, 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_requeue_front_keeps_order_ahead_of_newer() {
        let mut buffer = RetryBuffer::new(Duration::from_secs(30));
        buffer.enqueue("a".into(), t0());
        buffer.enqueue("b".into(), t0());
        let (sendable, _) = buffer.flush(t0());

        buffer.enqueue("c".into(), t0() + secs(1));
        buffer.requeue_front(sendable);

        let (sendable, _) = buffer.flush(t0() + secs(2));
        let messages: Vec<_> = sendable.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["a", "b", "c"]);
        assert_eq!(sendable[0].enqueued_at, t0());
    }

    proptest! {
        #[test]
        fn prop_flush_keeps_fifo_and_filters_by_age(ages in proptest::collection::vec(0i64..60, 0..40)) {
            let ttl = 30;
            let mut buffer = RetryBuffer::new(Duration::from_secs(ttl as u64));
            for (i, age) in ages.iter().enumerate() {
                buffer.enqueue(i.to_string(), t0() - secs(*age));
            }

            let (sendable, dropped) = buffer.flush(t0());

            let expected: Vec<String> = ages
                .iter()
                .enumerate()
                .filter(|(_, age)| **age <= ttl)
                .map(|(i, _)| i.to_string())
                .collect();
            let actual: Vec<String> = sendable.into_iter().map(|e| e.message).collect();
            prop_assert_eq!(actual, expected.clone());
            prop_assert_eq!(dropped, ages.len() - expected.len());
        }
    }
}
