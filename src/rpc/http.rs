//! HTTP and HTTPS transport variants of the RPC client.

use super::TransportError;
use crate::stats::TestMetrics;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Dispatches a single JSON-RPC call over HTTP(S).
///
/// Always sets `Content-Type: application/json`. Sets `Accept-Encoding: Identity` unless
/// `compressed` is set (the `http_comp` transport variant). If `bearer` is set, sends it
/// verbatim in `Authorization`. The round-trip is measured as wall-clock time to receive the
/// first byte of the response; the JSON decode time is folded into
/// [`TestMetrics::unmarshalling_time`].
pub(crate) async fn call(
    client: &reqwest::Client,
    url: &str,
    compressed: bool,
    bearer: Option<&str>,
    body: Vec<u8>,
    cancel: &CancellationToken,
) -> Result<(Value, TestMetrics), TransportError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if !compressed {
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("Identity"));
    }
    if let Some(bearer) = bearer {
        let value = HeaderValue::from_str(&format!("Bearer {bearer}"))
            .map_err(|e| TransportError::Request(e.to_string()))?;
        headers.insert(AUTHORIZATION, value);
    }

    let request = client.post(url).headers(headers).body(body);

    let start = Instant::now();
    let response = tokio::select! {
        result = request.send() => result.map_err(|e| TransportError::Connect(e.to_string()))?,
        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
    };
    let round_trip = start.elapsed();

    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::NonSuccessStatus(status.as_u16()));
    }

    let bytes = tokio::select! {
        result = response.bytes() => result.map_err(|e| TransportError::Connect(e.to_string()))?,
        _ = cancel.cancelled() => return Err(TransportError::Cancelled),
    };

    let decode_start = Instant::now();
    let value: Value =
        serde_json::from_slice(&bytes).map_err(|e| TransportError::Decode(e.to_string()))?;
    let decode_time = decode_start.elapsed();

    let mut metrics = TestMetrics::default();
    metrics.round_trip_time = round_trip;
    metrics.unmarshalling_time = decode_time;

    Ok((value, metrics))
}
