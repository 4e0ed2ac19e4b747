//! Heartbeat liveness watchdog.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Deadline that moves forward every time the peer shows signs of life.
#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: Duration,
    deadline: Instant,
}

impl Watchdog {
    /// Arm a watchdog that fires `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: Instant::now() + timeout,
        }
    }

    /// Record activity, pushing the deadline out by a full timeout.
    pub fn reset(&mut self) {
        self.deadline = Instant::now() + self.timeout;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve once the current deadline passes.
    ///
    /// The returned future captures the deadline at call time; callers in a
    /// select loop re-create it each iteration so resets take effect.
    pub async fn expired(&self) {
        sleep_until(self.deadline).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_timeout() {
        let watchdog = Watchdog::new(Duration::from_secs(2));
        let mut expired = task::spawn(watchdog.expired());
        assert_pending!(expired.poll());

        advance(Duration::from_millis(1999)).await;
        assert_pending!(expired.poll());

        advance(Duration::from_millis(1)).await;
        assert_ready!(expired.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_extends_deadline() {
        let mut watchdog = Watchdog::new(Duration::from_secs(2));

        advance(Duration::from_millis(1500)).await;
        watchdog.reset();
        advance(Duration::from_millis(1500)).await;
        assert_pending!(task::spawn(watchdog.expired()).poll());

        let started = Instant::now();
        watchdog.expired().await;
        let waited = Instant::now() - started;
        assert!(waited >= Duration::from_millis(500));
        assert!(waited < Duration::from_millis(510));
    }
}
