//! Inbound frame routing.

use std::sync::Arc;

use fxrelay_common::RelayError;
use fxrelay_fx::Converter;
use fxrelay_protocol::{decode, ConversionRequest, Frame, Inbound};
use tracing::{error, info, instrument, warn};

use crate::metrics::RelayMetrics;
use crate::outbox::Outbox;

/// What the router did with a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Peer heartbeat. Nothing to answer.
    Heartbeat,
    /// Valid request handed to a conversion task.
    Dispatched(i64),
    /// Frame rejected; an error reply was submitted.
    Rejected(Option<i64>),
}

/// Turns inbound frames into conversions and replies.
#[derive(Clone)]
pub struct MessageRouter {
    converter: Arc<Converter>,
    outbox: Outbox,
    metrics: Arc<RelayMetrics>,
}

impl MessageRouter {
    pub fn new(converter: Arc<Converter>, outbox: Outbox, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            converter,
            outbox,
            metrics,
        }
    }

    /// Route one text frame. Must be called from within a tokio runtime.
    pub fn route(&self, text: &str) -> Routed {
        match decode(text) {
            Ok(Inbound::Heartbeat) => {
                self.metrics.heartbeat_received();
                Routed::Heartbeat
            }
            Ok(Inbound::Request(request)) => {
                let id = request.id;
                info!(id, currency = %request.payload.currency, "Processing conversion request");

                let router = self.clone();
                tokio::spawn(async move {
                    let reply = router.respond(request).await;
                    router.outbox.submit(reply);
                });

                Routed::Dispatched(id)
            }
            Err(e) => {
                self.metrics.frame_rejected();
                warn!(
                    id = ?e.id,
                    code = RelayError::from(e.clone()).error_code(),
                    reason = %e.reason,
                    "Rejecting inbound frame"
                );
                self.outbox.submit(e.to_frame());
                Routed::Rejected(e.id)
            }
        }
    }

    /// Convert a request and build its reply.
    #[instrument(skip(self, request), fields(id = request.id))]
    pub async fn respond(&self, request: ConversionRequest) -> Frame {
        let id = request.id;
        let result = self
            .converter
            .convert(request.payload.stake, &request.payload.currency, request.rate_date)
            .await;

        match result {
            Ok(conversion) => {
                self.metrics.conversion_succeeded();
                request.into_response(conversion.output, conversion.executed_at)
            }
            Err(e) => {
                self.metrics.conversion_failed();
                let classified = RelayError::from(e.clone());
                if classified.is_request_scoped() {
                    warn!(id, code = classified.error_code(), error = %e, "Conversion failed");
                } else {
                    error!(id, code = classified.error_code(), error = %e, "Conversion failed");
                }
                Frame::error(Some(id), &e)
            }
        }
    }
}
