//! Response assembly and error reporting.
//!
//! # Responsibilities
//! - Build client responses from a status, rewritten headers and a body
//! - Log and count failures before rendering them as JSON
//!
//! # Design Decisions
//! - Upstream statuses pass through untouched; the proxy only invents
//!   statuses for its own failures (400, 413, 426, 502, 504)

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::error::ProxyError;
use crate::http::request::RequestContext;
use crate::observability::metrics;

pub fn from_parts(status: StatusCode, headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Log a failure with its request context and render it for the client.
pub fn error_response(ctx: &RequestContext, err: ProxyError) -> Response {
    let status = err.status();
    if status.is_server_error() {
        metrics::record_upstream_error(err.kind());
        tracing::error!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            class = %ctx.class,
            kind = err.kind(),
            error = %err,
            "Proxy request failed"
        );
    } else {
        tracing::warn!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.path,
            class = %ctx.class,
            kind = err.kind(),
            error = %err,
            "Request rejected"
        );
    }
    err.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, HeaderValue, Request};

    use crate::routing::RouteClass;

    #[test]
    fn from_parts_keeps_everything() {
        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, HeaderValue::from_static("/web/index.html"));
        let response = from_parts(StatusCode::FOUND, headers, Body::empty());
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()[header::LOCATION], "/web/index.html");
    }

    #[test]
    fn errors_render_their_status() {
        let ctx = RequestContext::new(&Request::new(Body::empty()), RouteClass::Tunnel);
        let response = error_response(&ctx, ProxyError::UpgradeRequired);
        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
    }
}
