//! The transport-polymorphic JSON-RPC dispatcher: HTTP, HTTPS, and WebSocket, each with an
//! optional per-message compression variant, plus optional JWT bearer auth.

mod http;
pub(crate) mod jwt;
mod ws;

use crate::stats::TestMetrics;
use serde_json::Value;
use std::{
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// A transport variant, selecting both the wire protocol and whether per-message compression is
/// requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Transport {
    /// Plain HTTP, `Accept-Encoding: Identity`.
    Http,
    /// Plain HTTP with compression negotiated.
    HttpComp,
    /// HTTPS, `Accept-Encoding: Identity`.
    Https,
    /// Plain WebSocket.
    Websocket,
    /// WebSocket with per-message compression negotiated.
    WebsocketComp,
}

impl Transport {
    /// The display name used in scheduler output lines (`NNNN. <transport,15>::<name,60>`).
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::HttpComp => "http_comp",
            Transport::Https => "https",
            Transport::Websocket => "websocket",
            Transport::WebsocketComp => "websocket_comp",
        }
    }

    /// Every transport variant, in the order they should be iterated when a caller requests
    /// "all transports".
    pub(crate) const ALL: [Transport; 5] = [
        Transport::Http,
        Transport::HttpComp,
        Transport::Https,
        Transport::Websocket,
        Transport::WebsocketComp,
    ];
}

impl FromStr for Transport {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Transport::Http),
            "http_comp" => Ok(Transport::HttpComp),
            "https" => Ok(Transport::Https),
            "websocket" => Ok(Transport::Websocket),
            "websocket_comp" => Ok(Transport::WebsocketComp),
            other => Err(TransportError::UnknownTransport(other.to_string())),
        }
    }
}

/// Errors raised while dispatching or validating a single RPC call.
#[derive(Debug, Error)]
pub(crate) enum TransportError {
    /// The requested transport string does not name a known variant.
    #[error("unknown transport: {0}")]
    UnknownTransport(String),
    /// The underlying connection could not be established.
    #[error("connect error: {0}")]
    Connect(String),
    /// The request could not be constructed (e.g. an invalid header value).
    #[error("request error: {0}")]
    Request(String),
    /// The handshake or request exceeded its timeout.
    #[error("transport timed out")]
    Timeout,
    /// The response status was not a success (HTTP transports only).
    #[error("non-success status: {0}")]
    NonSuccessStatus(u16),
    /// The response body failed to decode as JSON.
    #[error("decode error: {0}")]
    Decode(String),
    /// The decoded response failed JSON-RPC 2.0 structural validation.
    #[error("response validation failed: {0}")]
    Validation(String),
    /// The call was aborted by cancellation.
    #[error("cancelled")]
    Cancelled,
}

/// The transport-polymorphic JSON-RPC dispatcher.
///
/// Safe for concurrent use across tasks: the inner [`reqwest::Client`] owns a process-wide
/// connection pool (keep-alive on, capped idle connections per host) that every worker shares by
/// cloning this client (a cheap, `Arc`-backed clone), rather than constructing a client per test.
#[derive(Debug, Clone)]
pub(crate) struct RpcClient {
    http: reqwest::Client,
    jwt_secret: Option<Vec<u8>>,
    verbose: bool,
}

impl RpcClient {
    /// Constructs a new client. `jwt_secret`, when set, is minted into a fresh bearer token on
    /// every dispatched call (see [`jwt::mint`]) rather than cached.
    pub(crate) fn new(jwt_secret: Option<Vec<u8>>, verbose: bool) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(32)
            .tcp_keepalive(std::time::Duration::from_secs(60))
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .expect("building the shared HTTP client cannot fail with these options");

        Self {
            http,
            jwt_secret,
            verbose,
        }
    }

    /// Dispatches `request_bytes` to `target` over `transport`, validating the decoded response
    /// as a JSON-RPC 2.0 reply and returning it alongside the metrics delta for this call.
    pub(crate) async fn call(
        &self,
        cancel: &CancellationToken,
        target: &str,
        transport: Transport,
        request_bytes: Vec<u8>,
    ) -> Result<(Value, TestMetrics), TransportError> {
        let bearer = match &self.jwt_secret {
            Some(secret) => {
                let now = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs())
                    .unwrap_or_default();
                let token = jwt::mint(secret, now).map_err(|e| TransportError::Request(e.to_string()))?;
                Some(token)
            }
            None => None,
        };

        let (value, metrics) = match transport {
            Transport::Http | Transport::HttpComp => {
                let url = normalize_url(target, "http");
                http::call(
                    &self.http,
                    &url,
                    matches!(transport, Transport::HttpComp),
                    bearer.as_deref(),
                    request_bytes,
                    cancel,
                )
                .await?
            }
            Transport::Https => {
                let url = normalize_url(target, "https");
                http::call(&self.http, &url, false, bearer.as_deref(), request_bytes, cancel).await?
            }
            Transport::Websocket | Transport::WebsocketComp => {
                let url = normalize_url(target, "ws");
                ws::call(
                    &url,
                    matches!(transport, Transport::WebsocketComp),
                    request_bytes,
                    cancel,
                )
                .await?
            }
        };

        if self.verbose {
            tracing::debug!(target: "rpc", transport = transport.name(), %target, "dispatched call");
        }

        validate_response(&value)?;

        Ok((value, metrics))
    }
}

/// Prefixes `target` with `scheme://` unless it already names a scheme (the external-provider
/// case, where the full URL is supplied verbatim).
fn normalize_url(target: &str, scheme: &str) -> String {
    if target.contains("://") {
        target.to_string()
    } else {
        format!("{scheme}://{target}")
    }
}

/// Verifies that `value` is a well-formed JSON-RPC 2.0 response: if an object, it must have a
/// `jsonrpc` field equal to `"2.0"` and an `id` field. If an array, every element is validated
/// recursively. `result` and `error` are inspected by the comparator, not mandated here.
fn validate_response(value: &Value) -> Result<(), TransportError> {
    match value {
        Value::Object(map) => {
            let jsonrpc_ok = map.get("jsonrpc").map(|v| v == "2.0").unwrap_or(false);
            if !jsonrpc_ok {
                return Err(TransportError::Validation(
                    "missing or invalid \"jsonrpc\" field".to_string(),
                ));
            }
            if !map.contains_key("id") {
                return Err(TransportError::Validation(
                    "missing \"id\" field".to_string(),
                ));
            }
            Ok(())
        }
        Value::Array(items) => {
            for item in items {
                validate_response(item)?;
            }
            Ok(())
        }
        other => Err(TransportError::Validation(format!(
            "expected a JSON object or array, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_every_transport_name() {
        for t in Transport::ALL {
            assert_eq!(Transport::from_str(t.name()).unwrap(), t);
        }
    }

    #[test]
    fn rejects_unknown_transport() {
        assert!(Transport::from_str("carrier-pigeon").is_err());
    }

    #[test]
    fn validates_well_formed_object_response() {
        let value = json!({"jsonrpc": "2.0", "id": 1, "result": "0x1"});
        assert!(validate_response(&value).is_ok());
    }

    #[test]
    fn rejects_missing_jsonrpc_field() {
        let value = json!({"id": 1, "result": "0x1"});
        assert!(validate_response(&value).is_err());
    }

    #[test]
    fn rejects_missing_id_field() {
        let value = json!({"jsonrpc": "2.0", "result": "0x1"});
        assert!(validate_response(&value).is_err());
    }

    #[test]
    fn tolerates_both_result_and_error_present() {
        let value = json!({"jsonrpc": "2.0", "id": 1, "result": "0x1", "error": null});
        assert!(validate_response(&value).is_ok());
    }

    #[test]
    fn validates_array_of_responses_recursively() {
        let value = json!([
            {"jsonrpc": "2.0", "id": 1, "result": "0x1"},
            {"jsonrpc": "2.0", "id": 2, "result": "0x2"},
        ]);
        assert!(validate_response(&value).is_ok());
    }

    #[test]
    fn rejects_array_with_one_bad_element() {
        let value = json!([
            {"jsonrpc": "2.0", "id": 1, "result": "0x1"},
            {"id": 2, "result": "0x2"},
        ]);
        assert!(validate_response(&value).is_err());
    }

    #[test]
    fn normalizes_host_port_to_scheme_url() {
        assert_eq!(normalize_url("127.0.0.1:8545", "http"), "http://127.0.0.1:8545");
    }

    #[test]
    fn leaves_full_url_untouched() {
        assert_eq!(
            normalize_url("https://example.com/rpc", "http"),
            "https://example.com/rpc"
        );
    }
}
