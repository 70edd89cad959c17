//! Proxy error taxonomy.
//!
//! Every failure that happens before response headers reach the client is
//! turned into a JSON body `{"error", "message", "details"?}` with the
//! matching status. Failures after that point abort the connection instead.

use std::error::Error as StdError;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced to clients by the proxy core.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed request, e.g. the tunnel path without `Upgrade: websocket`.
    #[error("{0}")]
    BadRequest(String),

    /// Upgrades are disabled for this deployment.
    #[error("WebSocket connections are not supported in this environment. Please use HTTP fallback.")]
    UpgradeRequired,

    /// Request body larger than the configured cap.
    #[error("request body exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    /// Connecting to, writing to or reading from the upstream failed.
    #[error("{message}: {details}")]
    BadGateway { message: String, details: String },

    /// The upstream sent no response headers in time.
    #[error("upstream did not respond within {} ms", .timeout.as_millis())]
    GatewayTimeout { timeout: Duration },

    /// Unexpected local failure.
    #[error("{0}")]
    Internal(String),
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ProxyError {
    /// Build a `BadGateway` from an upstream error, keeping its cause chain
    /// but no backtrace.
    pub fn bad_gateway(message: impl Into<String>, err: &(dyn StdError + 'static)) -> Self {
        ProxyError::BadGateway {
            message: message.into(),
            details: error_chain(err),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::UpgradeRequired => StatusCode::UPGRADE_REQUIRED,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::BadGateway { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Category string used in the `error` field.
    pub fn category(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "Bad Request",
            ProxyError::UpgradeRequired => "WebSocket Upgrade Required",
            ProxyError::PayloadTooLarge { .. } => "Payload Too Large",
            ProxyError::BadGateway { .. } => "Bad Gateway",
            ProxyError::GatewayTimeout { .. } => "Gateway Timeout",
            ProxyError::Internal(_) => "Internal Server Error",
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::BadRequest(_) => "bad_request",
            ProxyError::UpgradeRequired => "upgrade_required",
            ProxyError::PayloadTooLarge { .. } => "payload_too_large",
            ProxyError::BadGateway { .. } => "bad_gateway",
            ProxyError::GatewayTimeout { .. } => "gateway_timeout",
            ProxyError::Internal(_) => "internal",
        }
    }

    pub fn body(&self) -> ErrorBody {
        let (message, details) = match self {
            ProxyError::BadGateway { message, details } => (message.clone(), Some(details.clone())),
            other => (other.to_string(), None),
        };
        ErrorBody {
            error: self.category(),
            message,
            details,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

/// Render an error and its sources as `outer: inner: root`, skipping
/// sources whose text the parent already includes.
pub fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !text.is_empty() && !out.contains(&text) {
            out.push_str(": ");
            out.push_str(&text);
        }
        source = cause.source();
    }
    out
}

/// Find an error of type `T` anywhere in a source chain.
pub fn find_cause<'a, T: StdError + 'static>(err: &'a (dyn StdError + 'static)) -> Option<&'a T> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<T>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use std::io;

    #[derive(Debug, Error)]
    #[error("connect failed")]
    struct Outer(#[source] io::Error);

    #[test]
    fn status_codes() {
        assert_eq!(ProxyError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ProxyError::UpgradeRequired.status(), StatusCode::UPGRADE_REQUIRED);
        assert_eq!(
            ProxyError::PayloadTooLarge { limit: 1 }.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ProxyError::GatewayTimeout { timeout: Duration::from_secs(1) }.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(ProxyError::Internal("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn chain_includes_sources() {
        let err = Outer(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"));
        assert_eq!(error_chain(&err), "connect failed: connection refused");
        assert!(find_cause::<io::Error>(&err).is_some());
    }

    #[tokio::test]
    async fn bad_gateway_body_carries_details() {
        let cause = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        let response = ProxyError::bad_gateway("Failed to connect to upstream server", &cause)
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Bad Gateway");
        assert_eq!(json["message"], "Failed to connect to upstream server");
        assert_eq!(json["details"], "connection refused");
    }

    #[tokio::test]
    async fn timeout_body_has_no_details() {
        let response = ProxyError::GatewayTimeout {
            timeout: Duration::from_millis(1500),
        }
        .into_response();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Gateway Timeout");
        assert_eq!(json["message"], "upstream did not respond within 1500 ms");
        assert!(json.get("details").is_none());
    }
}
