//! Connection supervisor.
//!
//! Owns the single connection to the requests endpoint: connects, keeps it
//! alive with heartbeats, watches for silence, reconnects, and is the only
//! writer to the transport. Replies reach it through the [`Outbox`].

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use fxrelay_common::{RelayError, Result, SharedClock};
use fxrelay_fx::Converter;
use fxrelay_protocol::HEARTBEAT_JSON;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::config::RelayConfig;
use crate::metrics::RelayMetrics;
use crate::outbox::{Outbox, Outgoing};
use crate::retry::RetryBuffer;
use crate::router::MessageRouter;
use crate::transport::{Connector, FrameSink, Transport};
use crate::watchdog::Watchdog;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// First connection attempt in progress.
    Connecting,
    /// Connected and operational.
    Connected,
    /// Peer went quiet or the transport failed.
    Stale,
    /// Re-establishing the connection.
    Reconnecting,
    /// Shut down. Terminal.
    Closed,
}

/// Timing used by the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub reconnect_delay: Duration,
    pub retry_message_ttl: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

impl From<&RelayConfig> for SupervisorConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat.interval,
            heartbeat_timeout: config.heartbeat.timeout,
            reconnect_delay: config.reconnect_delay,
            retry_message_ttl: config.retry_message_ttl,
        }
    }
}

/// Requests a graceful stop of a running supervisor.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }
}

/// Why a connection ended.
#[derive(Debug)]
enum Disconnect {
    Shutdown,
    Dropped(RelayError),
}

/// Supervises the connection for the lifetime of the process.
pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    router: MessageRouter,
    outbox_rx: mpsc::UnboundedReceiver<Outgoing>,
    retry: RetryBuffer,
    config: SupervisorConfig,
    clock: SharedClock,
    metrics: Arc<RelayMetrics>,
    state_tx: watch::Sender<ConnectionState>,
    transitions_tx: broadcast::Sender<ConnectionState>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConnectionSupervisor {
    /// Create a supervisor. Nothing happens until [`run`](Self::run).
    pub fn new(
        connector: Arc<dyn Connector>,
        converter: Arc<Converter>,
        config: SupervisorConfig,
        clock: SharedClock,
    ) -> Self {
        let metrics = Arc::new(RelayMetrics::new());
        let (outbox, outbox_rx) = Outbox::channel(clock.clone());
        let router = MessageRouter::new(converter, outbox, metrics.clone());
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let (transitions_tx, _) = broadcast::channel(64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            connector,
            router,
            outbox_rx,
            retry: RetryBuffer::new(config.retry_message_ttl),
            config,
            clock,
            metrics,
            state_tx,
            transitions_tx,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Get a handle that stops the supervisor.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Watch connection state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Every state change in order, including ones a `watch` receiver would
    /// see coalesced. Lagging receivers lose the oldest changes.
    pub fn transitions(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions_tx.subscribe()
    }

    /// Get current state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        self.metrics.clone()
    }

    /// Run until shut down or a fatal error occurs.
    #[instrument(skip(self), fields(endpoint = %self.connector.endpoint()))]
    pub async fn run(mut self) -> Result<()> {
        let result = self.supervise().await;

        if !self.retry.is_empty() {
            warn!(pending = self.retry.len(), "Stopping with undelivered replies");
        }
        self.transition(ConnectionState::Closed);

        if let Err(e) = &result {
            error!(code = e.error_code(), error = %e, "Supervisor stopped on fatal error");
        }
        result
    }

    async fn supervise(&mut self) -> Result<()> {
        let mut next = ConnectionState::Connecting;

        loop {
            self.transition(next);

            let Some(transport) = self.establish().await? else {
                return Ok(());
            };
            self.transition(ConnectionState::Connected);

            let outcome = match self.serve(transport).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => Disconnect::Dropped(e),
            };

            match outcome {
                Disconnect::Shutdown => return Ok(()),
                Disconnect::Dropped(reason) if reason.is_fatal() => return Err(reason),
                Disconnect::Dropped(reason) => {
                    if reason.is_connection_scoped() {
                        warn!(code = reason.error_code(), error = %reason, "Connection lost");
                    } else {
                        error!(
                            code = reason.error_code(),
                            error = %reason,
                            "Connection lost on unexpected error"
                        );
                    }
                    self.transition(ConnectionState::Stale);
                }
            }

            self.metrics.reconnect();
            next = ConnectionState::Reconnecting;
        }
    }

    /// Connect, retrying with a fixed delay until connected, shut down
    /// (`None`), or the connector reports an error that retrying cannot fix.
    async fn establish(&mut self) -> Result<Option<Transport>> {
        loop {
            if self.is_shutting_down() {
                return Ok(None);
            }

            tokio::select! {
                _ = self.shutdown_rx.changed() => return Ok(None),
                result = self.connector.connect() => match result {
                    Ok(transport) => return Ok(Some(transport)),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => warn!(
                        error = %e,
                        retry_in = ?self.config.reconnect_delay,
                        "Connection attempt failed"
                    ),
                },
            }

            tokio::select! {
                _ = self.shutdown_rx.changed() => return Ok(None),
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }
    }

    async fn serve(&mut self, transport: Transport) -> Result<Disconnect> {
        let Transport { mut sink, mut stream } = transport;

        self.divert_pending()?;
        if let Some(reason) = self.replay(&mut sink).await {
            return Ok(Disconnect::Dropped(reason));
        }

        let mut watchdog = Watchdog::new(self.config.heartbeat_timeout);
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => break Disconnect::Shutdown,

                _ = watchdog.expired() => {
                    break Disconnect::Dropped(RelayError::WatchdogTimeout(watchdog.timeout()));
                }

                _ = ticker.tick() => {
                    if let Err(e) = sink.send(HEARTBEAT_JSON.to_string()).await {
                        break Disconnect::Dropped(e);
                    }
                    self.metrics.heartbeat_sent();
                }

                inbound = stream.next() => match inbound {
                    Some(Ok(text)) => {
                        watchdog.reset();
                        self.metrics.frame_received();
                        self.router.route(&text);
                    }
                    Some(Err(e)) => break Disconnect::Dropped(e),
                    None => {
                        break Disconnect::Dropped(RelayError::TransportDrop(
                            "stream ended".to_string(),
                        ));
                    }
                },

                Some(outgoing) = self.outbox_rx.recv() => {
                    let message = outgoing.frame.encode()?;
                    if let Err(e) = sink.send(message.clone()).await {
                        self.retry.enqueue(message, outgoing.created_at);
                        self.metrics.reply_buffered();
                        break Disconnect::Dropped(e);
                    }
                    self.metrics.frame_sent();
                }
            }
        };

        if let Err(e) = sink.close().await {
            debug!(error = %e, "Error closing transport");
        }

        Ok(outcome)
    }

    /// Move replies produced while disconnected into the retry buffer.
    fn divert_pending(&mut self) -> Result<()> {
        while let Ok(outgoing) = self.outbox_rx.try_recv() {
            self.retry.enqueue(outgoing.frame.encode()?, outgoing.created_at);
            self.metrics.reply_buffered();
        }
        Ok(())
    }

    /// Send buffered replies. Returns the failure if the transport drops.
    async fn replay(&mut self, sink: &mut FrameSink) -> Option<RelayError> {
        let (entries, dropped) = self.retry.flush(self.clock.now());
        self.metrics.replies_dropped(dropped as u64);

        if entries.is_empty() {
            return None;
        }
        info!(count = entries.len(), dropped, "Replaying undelivered replies");

        let mut pending = entries.into_iter();
        while let Some(entry) = pending.next() {
            if let Err(e) = sink.send(entry.message.clone()).await {
                let remaining: Vec<_> = std::iter::once(entry).chain(pending).collect();
                self.retry.requeue_front(remaining);
                return Some(e);
            }
            self.metrics.reply_replayed();
        }

        None
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state_tx.send_replace(next);
        if previous != next {
            info!(from = ?previous, to = ?next, "Connection state changed");
            let _ = self.transitions_tx.send(next);
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }
}
