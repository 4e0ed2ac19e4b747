//! Reply channel into the connection supervisor.

use fxrelay_common::{SharedClock, Timestamp};
use fxrelay_protocol::Frame;
use tokio::sync::mpsc;
use tracing::warn;

/// Reply waiting to be written, stamped with its creation time.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub frame: Frame,
    pub created_at: Timestamp,
}

/// Sending half of the reply channel. Cheap to clone.
#[derive(Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outgoing>,
    clock: SharedClock,
}

impl Outbox {
    /// Create an outbox and the receiver the supervisor drains.
    pub fn channel(clock: SharedClock) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, clock }, rx)
    }

    /// Hand a reply to the supervisor. Never fails; a reply submitted after
    /// the supervisor has stopped is logged and discarded.
    pub fn submit(&self, frame: Frame) {
        let outgoing = Outgoing {
            frame,
            created_at: self.clock.now(),
        };

        if let Err(mpsc::error::SendError(lost)) = self.tx.send(outgoing) {
            warn!(
                id = ?lost.frame.correlation_id(),
                "Supervisor stopped, discarding reply"
            );
        }
    }
}
