//! Accepting relays and talking to them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use fxrelay_protocol::HEARTBEAT_JSON;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::request::RequestGenerator;

/// Shared request source; every connection draws ids from the same sequence.
pub type SharedGenerator = Arc<Mutex<RequestGenerator<StdRng>>>;

/// How the endpoint behaves on each connection.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Heartbeat period, or `None` to stay silent between requests.
    pub heartbeat_interval: Option<Duration>,
    pub request_interval: Duration,
}

/// Accept connections until the listener fails, serving each on its own task.
pub async fn accept_loop(
    listener: TcpListener,
    config: SessionConfig,
    generator: SharedGenerator,
) -> anyhow::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let config = config.clone();
        let generator = generator.clone();

        tokio::spawn(async move {
            if let Err(e) = serve(stream, peer, config, generator).await {
                warn!(%peer, error = %e, "Session ended with error");
            }
        });
    }
}

async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    config: SessionConfig,
    generator: SharedGenerator,
) -> anyhow::Result<()> {
    let ws = accept_async(stream).await?;
    info!(%peer, "Relay connected");

    let (mut write, mut read) = ws.split();

    let mut requests = interval(config.request_interval);
    requests.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut heartbeats = interval(config.heartbeat_interval.unwrap_or(Duration::from_secs(1)));
    heartbeats.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = heartbeats.tick(), if config.heartbeat_interval.is_some() => {
                write.send(Message::text(HEARTBEAT_JSON)).await?;
            }

            _ = requests.tick() => {
                let request = generator.lock().next_request();
                write.send(Message::text(request)).await?;
                info!(%peer, "Sent conversion request");
            }

            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => log_reply(peer, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
        }
    }

    info!(%peer, "Relay disconnected");
    Ok(())
}

fn log_reply(peer: SocketAddr, text: &str) {
    let kind = serde_json::from_str::<Value>(text)
        .ok()
        .and_then(|frame| frame.get("type").and_then(Value::as_str).map(str::to_owned));

    match kind.as_deref() {
        Some("heartbeat") => debug!(%peer, "Heartbeat"),
        Some(_) => info!(%peer, reply = %text, "Received reply"),
        None => warn!(%peer, frame = %text, "Received unreadable frame"),
    }
}
