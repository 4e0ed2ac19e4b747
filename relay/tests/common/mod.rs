//! In-process transport and fixtures for relay integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::channel::mpsc as fmpsc;
use futures::{future, SinkExt, StreamExt};
use fxrelay_common::{Clock, Currency, CurrencyPair, RelayError, Result, Timestamp};
use fxrelay_fx::{Converter, MemoryRateStore, MockRateProvider, RateCache, RateCacheConfig};
use fxrelay_relay::{
    ConnectionState, ConnectionSupervisor, Connector, FrameSink, RelayMetrics, ShutdownHandle,
    SupervisorConfig, Transport,
};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Wall clock that follows tokio's (possibly paused) clock.
pub struct TokioClock {
    origin: Timestamp,
    start: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            start: Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Timestamp {
        self.origin + chrono::Duration::from_std(self.start.elapsed()).unwrap()
    }
}

/// Outcome of one connection attempt.
#[derive(Debug, Clone, Copy)]
pub enum Attempt {
    Accept,
    Refuse,
    /// Accept, then fail every send after the first `n`.
    AcceptFailingAfter(usize),
    /// Reject with an error that retrying cannot fix.
    Misconfigured,
}

/// Far end of an accepted connection.
pub struct Peer {
    pub to_relay: fmpsc::UnboundedSender<Result<String>>,
    pub from_relay: fmpsc::UnboundedReceiver<String>,
}

impl Peer {
    pub fn send(&self, text: impl Into<String>) {
        self.to_relay.unbounded_send(Ok(text.into())).unwrap();
    }

    /// Next non-heartbeat frame, or `None` once the relay hangs up.
    pub async fn next_reply(&mut self) -> Option<Value> {
        while let Some(text) = self.from_relay.next().await {
            let frame: Value = serde_json::from_str(&text).unwrap();
            if frame["type"] != "heartbeat" {
                return Some(frame);
            }
        }
        None
    }

    /// Next frame of any kind.
    pub async fn next_frame(&mut self) -> Option<Value> {
        let text = self.from_relay.next().await?;
        Some(serde_json::from_str(&text).unwrap())
    }
}

/// Connector handing out in-memory channel pairs.
///
/// Follows a script of attempts, accepting every attempt once it runs out.
pub struct ChannelConnector {
    script: Mutex<VecDeque<Attempt>>,
    attempts: Mutex<Vec<Instant>>,
    peers: mpsc::UnboundedSender<Peer>,
}

impl ChannelConnector {
    pub fn new(script: Vec<Attempt>) -> (Self, mpsc::UnboundedReceiver<Peer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Mutex::new(script.into()),
            attempts: Mutex::new(Vec::new()),
            peers,
        };
        (connector, rx)
    }

    /// When each connection attempt was made.
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    fn endpoint(&self) -> &str {
        "channel://test"
    }

    async fn connect(&self) -> Result<Transport> {
        self.attempts.lock().unwrap().push(Instant::now());
        let attempt = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Attempt::Accept);

        match attempt {
            Attempt::Refuse => {
                return Err(RelayError::TransportDrop("connection refused".to_string()));
            }
            Attempt::Misconfigured => {
                return Err(RelayError::Configuration("no such endpoint".to_string()));
            }
            Attempt::Accept | Attempt::AcceptFailingAfter(_) => {}
        }

        let (to_relay, inbound) = fmpsc::unbounded();
        let (outbound, from_relay) = fmpsc::unbounded();
        let _ = self.peers.send(Peer {
            to_relay,
            from_relay,
        });

        let sink = outbound.sink_map_err(|e| RelayError::TransportDrop(e.to_string()));
        let sink: FrameSink = match attempt {
            Attempt::AcceptFailingAfter(limit) => {
                let mut sent = 0;
                Box::pin(sink.with(move |text: String| {
                    sent += 1;
                    future::ready(if sent <= limit {
                        Ok(text)
                    } else {
                        Err(RelayError::TransportDrop("send failed".to_string()))
                    })
                }))
            }
            _ => Box::pin(sink),
        };
        Ok(Transport::new(sink, Box::pin(inbound)))
    }
}

/// Running relay wired to a [`ChannelConnector`].
pub struct Relay {
    pub peers: mpsc::UnboundedReceiver<Peer>,
    pub connector: Arc<ChannelConnector>,
    pub provider: Arc<MockRateProvider>,
    pub metrics: Arc<RelayMetrics>,
    pub shutdown: ShutdownHandle,
    pub state: watch::Receiver<ConnectionState>,
    pub transitions: broadcast::Receiver<ConnectionState>,
    pub handle: JoinHandle<Result<()>>,
}

impl Relay {
    pub async fn next_peer(&mut self) -> Peer {
        self.peers.recv().await.unwrap()
    }

    /// State changes recorded so far.
    pub fn drain_transitions(&mut self) -> Vec<ConnectionState> {
        let mut seen = Vec::new();
        while let Ok(state) = self.transitions.try_recv() {
            seen.push(state);
        }
        seen
    }

    pub async fn stop(self) -> Result<()> {
        self.shutdown.shutdown();
        self.handle.await.unwrap()
    }
}

pub fn supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        heartbeat_interval: Duration::from_secs(1),
        heartbeat_timeout: Duration::from_secs(2),
        reconnect_delay: Duration::from_secs(2),
        retry_message_ttl: Duration::from_secs(30),
    }
}

/// Provider quoting USD at 0.9 EUR.
pub fn provider() -> MockRateProvider {
    let provider = MockRateProvider::new("mock");
    provider.set_rate(CurrencyPair::to_eur(Currency::usd()), dec!(0.9));
    provider
}

pub fn start(script: Vec<Attempt>, config: SupervisorConfig, provider: MockRateProvider) -> Relay {
    let clock = Arc::new(TokioClock::new());
    let provider = Arc::new(provider);
    let cache = Arc::new(RateCache::new(
        Arc::new(MemoryRateStore::new(clock.clone())),
        provider.clone(),
        RateCacheConfig::default(),
    ));
    let converter = Arc::new(Converter::new(cache, clock.clone()));

    let (connector, peers) = ChannelConnector::new(script);
    let connector = Arc::new(connector);

    let supervisor = ConnectionSupervisor::new(connector.clone(), converter, config, clock);
    let shutdown = supervisor.shutdown_handle();
    let metrics = supervisor.metrics();
    let state = supervisor.subscribe();
    let transitions = supervisor.transitions();
    let handle = tokio::spawn(supervisor.run());

    Relay {
        peers,
        connector,
        provider,
        metrics,
        shutdown,
        state,
        transitions,
        handle,
    }
}

pub fn request(id: i64, currency: &str, stake: f64) -> String {
    json!({
        "type": "message",
        "id": id,
        "payload": {
            "marketId": 123456,
            "selectionId": 987654,
            "odds": 2.2,
            "stake": stake,
            "currency": currency,
            "date": "2021-05-18T21:32:42.324Z"
        }
    })
    .to_string()
}
