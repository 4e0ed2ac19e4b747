//! Relay counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Relay metrics.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Inbound frames of any kind.
    pub frames_received: AtomicU64,
    /// Outbound replies written to the transport.
    pub frames_sent: AtomicU64,
    /// Inbound heartbeats.
    pub heartbeats_received: AtomicU64,
    /// Outbound heartbeats.
    pub heartbeats_sent: AtomicU64,
    /// Requests answered with a converted stake.
    pub conversions_succeeded: AtomicU64,
    /// Valid requests whose conversion failed.
    pub conversions_failed: AtomicU64,
    /// Frames that failed decoding or validation.
    pub frames_rejected: AtomicU64,
    /// Connections lost and re-established.
    pub reconnects: AtomicU64,
    /// Replies parked in the retry buffer.
    pub replies_buffered: AtomicU64,
    /// Replies delivered from the retry buffer.
    pub replies_replayed: AtomicU64,
    /// Replies discarded for exceeding the retry TTL.
    pub replies_dropped: AtomicU64,
}

impl RelayMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_received(&self) {
        self.heartbeats_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conversion_succeeded(&self) {
        self.conversions_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conversion_failed(&self) {
        self.conversions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reply_buffered(&self) {
        self.replies_buffered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reply_replayed(&self) {
        self.replies_replayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `count` replies dropped by the retry buffer.
    pub fn replies_dropped(&self, count: u64) {
        self.replies_dropped.fetch_add(count, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            heartbeats_received: self.heartbeats_received.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            conversions_succeeded: self.conversions_succeeded.load(Ordering::Relaxed),
            conversions_failed: self.conversions_failed.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            replies_buffered: self.replies_buffered.load(Ordering::Relaxed),
            replies_replayed: self.replies_replayed.load(Ordering::Relaxed),
            replies_dropped: self.replies_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub frames_sent: u64,
    pub heartbeats_received: u64,
    pub heartbeats_sent: u64,
    pub conversions_succeeded: u64,
    pub conversions_failed: u64,
    pub frames_rejected: u64,
    pub reconnects: u64,
    pub replies_buffered: u64,
    pub replies_replayed: u64,
    pub replies_dropped: u64,
}
