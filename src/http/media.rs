//! Media stream relay.
//!
//! # Responsibilities
//! - Relay GET requests for video and audio paths, Range header included
//! - Hand upstream 301/302 redirects straight to the client
//! - Re-frame the body into fixed-size chunks with backpressure
//!
//! # Data Flow
//! ```text
//! client GET /Videos/..  (Range: bytes=..)
//!     → upstream GET, same headers + X-Forwarded-*
//!     → 301/302 + Location ?  → redirect to client, empty body
//!     → Range requested       → 206, whatever the upstream status
//!     → FrameStream(frame_size) → client
//! ```
//!
//! # Design Decisions
//! - The upstream Content-Length is dropped and the body is chunked, so
//!   the client never sees a length that disagrees with what is relayed
//! - The path's timeout tier (long for media) bounds both the wait for
//!   headers and every idle gap while streaming

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::Response;
use futures_util::TryStreamExt;

use crate::error::ProxyError;
use crate::http::body::FrameStream;
use crate::http::forward::{relay_body, send};
use crate::http::request::{path_and_query, RequestContext};
use crate::http::response;
use crate::http::server::ProxyState;
use crate::observability::metrics;
use crate::routing::RouteClass;
use crate::security::ResponseContext;

/// Relay a media GET.
pub async fn relay(
    state: &ProxyState,
    ctx: &RequestContext,
    request: Request<Body>,
) -> Result<Response, ProxyError> {
    let url = state.upstream.http_url(&path_and_query(&request));
    let (parts, _body) = request.into_parts();
    let timeout = state.timeouts.timeout_for(&ctx.path, &parts.method);
    let range_requested = parts.headers.contains_key(header::RANGE);

    let headers = state
        .headers
        .outbound_request_headers(&parts.headers, &state.upstream, ctx.client_addr);

    tracing::debug!(
        request_id = %ctx.request_id,
        path = %ctx.path,
        range = ?parts.headers.get(header::RANGE),
        "Relaying media request"
    );

    let upstream = send(state.client.get(url).headers(headers), timeout).await?;
    let status = upstream.status();

    if let Some(redirect) = redirect_response(state, status, upstream.headers()) {
        tracing::debug!(
            request_id = %ctx.request_id,
            status = status.as_u16(),
            "Passing media redirect to client"
        );
        return Ok(redirect);
    }

    let response_ctx = ResponseContext {
        path: &ctx.path,
        class: RouteClass::Media,
        range_requested,
    };
    let status = state.headers.response_status(status, &response_ctx);
    let headers = state.headers.response_headers(upstream.headers(), &response_ctx);

    let frames = FrameStream::new(Box::pin(relay_body(upstream, timeout, ctx)), state.frame_size)
        .inspect_ok(|frame| metrics::record_media_bytes(frame.len()));

    Ok(response::from_parts(status, headers, Body::from_stream(frames)))
}

/// 301/302 with a Location becomes the same redirect with CORS added.
fn redirect_response(
    state: &ProxyState,
    status: StatusCode,
    upstream: &HeaderMap,
) -> Option<Response> {
    if !matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND) {
        return None;
    }
    let location = upstream.get(header::LOCATION)?;

    let mut headers = HeaderMap::new();
    headers.insert(header::LOCATION, location.clone());
    state.headers.apply_cors(&mut headers, RouteClass::Media);
    Some(response::from_parts(status, headers, Body::empty()))
}
