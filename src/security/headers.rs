//! Header manipulation.
//!
//! # Responsibilities
//! - Outbound: strip hop-by-hop headers, rewrite `Host`, add X-Forwarded-*
//! - Inbound: strip end-to-end security headers, inject CORS, assign
//!   cache-control, re-frame media relay responses
//!
//! # Design Decisions
//! - Pure functions over `HeaderMap`; every call returns a fresh map
//! - Rules are data from `HeaderConfig`, compiled once at startup
//! - Rules apply in a fixed order and later rules win

use std::net::SocketAddr;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue, InvalidHeaderName, InvalidHeaderValue};
use axum::http::StatusCode;
use thiserror::Error;

use crate::config::HeaderConfig;
use crate::routing::{RouteClass, UpstreamTarget};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Connection-scoped headers that never cross the proxy.
const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::UPGRADE,
];

/// Handshake headers the upstream WebSocket client generates itself.
const WEBSOCKET_HANDSHAKE: [HeaderName; 4] = [
    header::SEC_WEBSOCKET_KEY,
    header::SEC_WEBSOCKET_VERSION,
    header::SEC_WEBSOCKET_EXTENSIONS,
    header::SEC_WEBSOCKET_ACCEPT,
];

/// Error raised when a configured header name or value is not valid HTTP.
#[derive(Debug, Error)]
pub enum HeaderConfigError {
    #[error("invalid header name '{0}': {1}")]
    Name(String, InvalidHeaderName),

    #[error("invalid value for {0}: {1}")]
    Value(&'static str, InvalidHeaderValue),
}

/// What the policy needs to know about the request a response answers.
#[derive(Debug, Clone, Copy)]
pub struct ResponseContext<'a> {
    pub path: &'a str,
    pub class: RouteClass,
    /// The inbound request carried a `Range` header.
    pub range_requested: bool,
}

/// Compiled header rules.
#[derive(Debug, Clone)]
pub struct HeaderPolicy {
    strip: Vec<HeaderName>,
    allow_origin: HeaderValue,
    media_allow_methods: HeaderValue,
    default_allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    media_cache_control: HeaderValue,
    default_cache_control: HeaderValue,
    forwarded_proto: HeaderValue,
}

fn value(field: &'static str, raw: &str) -> Result<HeaderValue, HeaderConfigError> {
    HeaderValue::from_str(raw).map_err(|e| HeaderConfigError::Value(field, e))
}

impl HeaderPolicy {
    pub fn from_config(config: &HeaderConfig) -> Result<Self, HeaderConfigError> {
        let strip = config
            .strip_response_headers
            .iter()
            .map(|name| {
                HeaderName::from_bytes(name.as_bytes())
                    .map_err(|e| HeaderConfigError::Name(name.clone(), e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            strip,
            allow_origin: value("allow_origin", &config.allow_origin)?,
            media_allow_methods: value("media_allow_methods", &config.media_allow_methods)?,
            default_allow_methods: value("default_allow_methods", &config.default_allow_methods)?,
            allow_headers: value("allow_headers", &config.allow_headers)?,
            media_cache_control: value("media_cache_control", &config.media_cache_control)?,
            default_cache_control: value("default_cache_control", &config.default_cache_control)?,
            forwarded_proto: value("forwarded_proto", &config.forwarded_proto)?,
        })
    }

    /// Headers for the request sent upstream.
    pub fn outbound_request_headers(
        &self,
        inbound: &HeaderMap,
        upstream: &UpstreamTarget,
        client: Option<SocketAddr>,
    ) -> HeaderMap {
        let mut headers = inbound.clone();
        for name in HOP_BY_HOP.iter() {
            headers.remove(name);
        }
        // the outbound body is re-framed by the client
        headers.remove(header::TRANSFER_ENCODING);

        if let Some(original_host) = inbound.get(header::HOST) {
            if !headers.contains_key(&X_FORWARDED_HOST) {
                headers.insert(X_FORWARDED_HOST, original_host.clone());
            }
        }
        if let Ok(host) = HeaderValue::from_str(&upstream.authority()) {
            headers.insert(header::HOST, host);
        }

        if let Some(addr) = client {
            let ip = addr.ip().to_string();
            let forwarded_for = match inbound.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(existing) if !existing.trim().is_empty() => format!("{existing}, {ip}"),
                _ => ip,
            };
            if let Ok(v) = HeaderValue::from_str(&forwarded_for) {
                headers.insert(X_FORWARDED_FOR, v);
            }
        }
        headers.insert(X_FORWARDED_PROTO, self.forwarded_proto.clone());

        headers
    }

    /// Headers added to the upstream WebSocket handshake. The handshake
    /// itself (key, version, upgrade) is produced by the WebSocket client.
    pub fn tunnel_request_headers(
        &self,
        inbound: &HeaderMap,
        upstream: &UpstreamTarget,
        client: Option<SocketAddr>,
    ) -> HeaderMap {
        let mut headers = self.outbound_request_headers(inbound, upstream, client);
        for name in WEBSOCKET_HANDSHAKE.iter() {
            headers.remove(name);
        }
        headers.remove(header::CONTENT_LENGTH);
        headers
    }

    /// Headers for the response sent to the client.
    pub fn response_headers(&self, upstream: &HeaderMap, ctx: &ResponseContext<'_>) -> HeaderMap {
        // 1. verbatim copy, minus the upstream hop's connection headers
        let mut headers = upstream.clone();
        for name in HOP_BY_HOP.iter() {
            headers.remove(name);
        }

        // 2. end-to-end security headers break proxied playback and embedding
        for name in &self.strip {
            headers.remove(name);
        }

        // 3. CORS
        self.apply_cors(&mut headers, ctx.class);

        // 4. cache-control
        if is_media_content_type(upstream) {
            headers.insert(header::CACHE_CONTROL, self.media_cache_control.clone());
        } else if !headers.contains_key(header::CACHE_CONTROL) {
            headers.insert(header::CACHE_CONTROL, self.default_cache_control.clone());
        }

        // 5. media relay re-framing
        if ctx.class == RouteClass::Media {
            headers.remove(header::CONTENT_LENGTH);
            headers.remove(header::TRANSFER_ENCODING);
            headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
            if ctx.range_requested {
                headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            }
        }

        headers
    }

    /// Status for the response sent to the client. Media relays of range
    /// requests always answer 206, whatever the upstream said.
    pub fn response_status(&self, upstream: StatusCode, ctx: &ResponseContext<'_>) -> StatusCode {
        if ctx.class == RouteClass::Media && ctx.range_requested {
            StatusCode::PARTIAL_CONTENT
        } else {
            upstream
        }
    }

    /// Insert the CORS triple for a route class.
    pub fn apply_cors(&self, headers: &mut HeaderMap, class: RouteClass) {
        let methods = match class {
            RouteClass::Media => &self.media_allow_methods,
            _ => &self.default_allow_methods,
        };
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, self.allow_origin.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, methods.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
    }
}

/// True if the `Content-Type` is `video/*` or `audio/*`.
pub fn is_media_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let ct = ct.trim_start().to_ascii_lowercase();
            ct.starts_with("video/") || ct.starts_with("audio/")
        })
        .unwrap_or(false)
}
