//! Generic request forwarding.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → HeaderPolicy::outbound_request_headers (hop-by-hop out, X-Forwarded-* in)
//!     → BodyLimits::outbound_body (POST/PUT/PATCH only)
//!     → send with the path's timeout tier
//!     → HeaderPolicy::response_headers
//!     → streamed body with per-chunk idle timeout
//! ```
//!
//! # Design Decisions
//! - The timeout bounds the wait for response headers. Once they arrive
//!   the same duration bounds each gap between body chunks
//! - Dropping the pending upstream future on timeout closes its socket
//! - Redirects are not followed; 3xx responses reach the client as-is
//! - No retries: a failed request fails once

use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use futures_util::TryStreamExt;

use crate::error::{find_cause, ProxyError};
use crate::http::body::idle_timeout;
use crate::http::request::{path_and_query, RequestContext};
use crate::http::response;
use crate::http::server::ProxyState;
use crate::routing::RouteClass;
use crate::security::{BodyTooLarge, ResponseContext};

/// Methods whose request body is sent upstream.
pub fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// Forward one request to the upstream and stream its response back.
pub async fn forward(
    state: &ProxyState,
    ctx: &RequestContext,
    request: Request<Body>,
) -> Result<Response, ProxyError> {
    let url = state.upstream.http_url(&path_and_query(&request));
    let (parts, body) = request.into_parts();
    let timeout = state.timeouts.timeout_for(&ctx.path, &parts.method);

    let headers = state
        .headers
        .outbound_request_headers(&parts.headers, &state.upstream, ctx.client_addr);

    let mut outbound = state
        .client
        .request(parts.method.clone(), url)
        .headers(headers);
    if carries_body(&parts.method) {
        outbound = outbound.body(state.limits.outbound_body(&parts.headers, body).await?);
    }

    tracing::debug!(
        request_id = %ctx.request_id,
        method = %ctx.method,
        path = %ctx.path,
        timeout_ms = timeout.as_millis() as u64,
        "Forwarding request"
    );

    let upstream = send(outbound, timeout).await?;

    let response_ctx = ResponseContext {
        path: &ctx.path,
        class: RouteClass::Generic,
        range_requested: false,
    };
    let status = upstream.status();
    let headers = state.headers.response_headers(upstream.headers(), &response_ctx);
    let body = Body::from_stream(relay_body(upstream, timeout, ctx));

    Ok(response::from_parts(status, headers, body))
}

/// Send an upstream request, waiting at most `timeout` for its headers.
pub async fn send(
    request: reqwest::RequestBuilder,
    timeout: Duration,
) -> Result<reqwest::Response, ProxyError> {
    match tokio::time::timeout(timeout, request.send()).await {
        Ok(Ok(response)) => Ok(response),
        Ok(Err(e)) => Err(upstream_error(e, timeout)),
        Err(_) => Err(ProxyError::GatewayTimeout { timeout }),
    }
}

/// Map a client error to what the proxy reports.
fn upstream_error(err: reqwest::Error, timeout: Duration) -> ProxyError {
    if let Some(too_large) = find_cause::<BodyTooLarge>(&err) {
        return ProxyError::PayloadTooLarge {
            limit: too_large.limit,
        };
    }

    let err = err.without_url();
    if err.is_builder() {
        ProxyError::Internal(format!("invalid upstream request: {err}"))
    } else if err.is_connect() {
        ProxyError::bad_gateway("Failed to connect to upstream server", &err)
    } else if err.is_timeout() {
        ProxyError::GatewayTimeout { timeout }
    } else {
        ProxyError::bad_gateway("Upstream request failed", &err)
    }
}

/// Upstream body as a client body stream. A failure here happens after the
/// status line went out, so it can only be logged; the connection is aborted.
pub fn relay_body(
    upstream: reqwest::Response,
    idle: Duration,
    ctx: &RequestContext,
) -> impl futures_util::Stream<Item = Result<bytes::Bytes, std::io::Error>> + Send + 'static {
    let request_id = ctx.request_id.clone();
    let path = ctx.path.clone();
    idle_timeout(upstream.bytes_stream(), idle).inspect_err(move |e| {
        tracing::warn!(
            request_id = %request_id,
            path = %path,
            error = %e,
            "Upstream body failed mid-response, aborting"
        );
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_uploads_carry_bodies() {
        assert!(carries_body(&Method::POST));
        assert!(carries_body(&Method::PUT));
        assert!(carries_body(&Method::PATCH));
        assert!(!carries_body(&Method::GET));
        assert!(!carries_body(&Method::DELETE));
        assert!(!carries_body(&Method::OPTIONS));
    }
}
