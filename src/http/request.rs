//! Request identity and per-request context.
//!
//! # Responsibilities
//! - Generate a UUID v4 request ID for every inbound request
//! - Capture what logging and metrics need before the request is consumed
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The ID travels upstream in `x-request-id` and back to the client
//! - A client-supplied `x-request-id` is kept as-is

use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderName, HeaderValue, Method, Request};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::routing::RouteClass;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Request ID generator for `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV4;

impl MakeRequestId for MakeRequestUuidV4 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// What the proxy remembers about a request while it is being served.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    pub path: String,
    pub class: RouteClass,
    pub client_addr: Option<SocketAddr>,
    pub started: Instant,
}

impl RequestContext {
    pub fn new(request: &Request<Body>, class: RouteClass) -> Self {
        let request_id = request
            .headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        let client_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        Self {
            request_id,
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            class,
            client_addr,
            started: Instant::now(),
        }
    }

    /// Same request, served under a different class.
    pub fn reclassify(mut self, class: RouteClass) -> Self {
        self.class = class;
        self
    }
}

/// Path plus query as sent upstream, `/` when the URI has neither.
pub fn path_and_query(request: &Request<Body>) -> String {
    request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_uuids() {
        let request = Request::new(());
        let mut make = MakeRequestUuidV4;
        let id = make.make_request_id(&request).unwrap();
        let text = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(text).is_ok());
    }

    #[test]
    fn context_reads_id_peer_and_path() {
        let mut request = Request::builder()
            .method(Method::POST)
            .uri("/Sessions/Playing?x=1")
            .header(X_REQUEST_ID, "abc-123")
            .body(Body::empty())
            .unwrap();
        let peer: SocketAddr = "10.0.0.5:41000".parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(peer));

        let ctx = RequestContext::new(&request, RouteClass::Generic);
        assert_eq!(ctx.request_id, "abc-123");
        assert_eq!(ctx.path, "/Sessions/Playing");
        assert_eq!(ctx.client_addr, Some(peer));
        assert_eq!(path_and_query(&request), "/Sessions/Playing?x=1");
    }

    #[test]
    fn missing_id_and_peer() {
        let request = Request::new(Body::empty());
        let ctx = RequestContext::new(&request, RouteClass::Media);
        assert_eq!(ctx.request_id, "unknown");
        assert!(ctx.client_addr.is_none());
        assert_eq!(path_and_query(&request), "/");
    }
}
