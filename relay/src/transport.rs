//! Text-frame transport and the WebSocket connector.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use fxrelay_common::{RelayError, Result};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info};

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = RelayError> + Send>>;

/// Inbound half of a connection. Ends (or yields an error) when the
/// connection is gone.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An established connection carrying JSON text frames.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
        Self { sink, stream }
    }
}

/// Opens connections to the requests endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Endpoint description for logs.
    fn endpoint(&self) -> &str;

    /// Open a new connection.
    async fn connect(&self) -> Result<Transport>;
}

/// Connector for `ws://` and `wss://` endpoints.
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn connect(&self) -> Result<Transport> {
        let (ws, response) = tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                RelayError::TransportDrop(format!(
                    "connecting to {} timed out after {:?}",
                    self.url, self.connect_timeout
                ))
            })?
            .map_err(|e| connect_error(&self.url, e))?;

        info!(url = %self.url, status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws.split();

        let sink = write
            .sink_map_err(|e| RelayError::TransportDrop(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, RelayError>(Message::text(text))));

        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => Some(Err(RelayError::TransportDrop(format!(
                    "closed by peer: {:?}",
                    frame
                )))),
                // Pings are answered by tungstenite itself.
                Ok(other) => {
                    debug!(kind = ?message_kind(&other), "Ignoring non-text frame");
                    None
                }
                Err(e) => Some(Err(RelayError::TransportDrop(e.to_string()))),
            })
        });

        Ok(Transport::new(Box::pin(sink), Box::pin(stream)))
    }
}

/// A URL the client cannot even try is a configuration problem; anything
/// else may clear up on the next attempt.
fn connect_error(url: &str, error: WsError) -> RelayError {
    match error {
        WsError::Url(_) | WsError::HttpFormat(_) => {
            RelayError::Configuration(format!("unusable WebSocket URL {}: {}", url, error))
        }
        other => RelayError::TransportDrop(format!("connecting to {}: {}", url, other)),
    }
}

fn message_kind(message: &Message) -> &'static str {
    match message {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
        Message::Frame(_) => "frame",
    }
}
