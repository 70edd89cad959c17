//! Request classification.
//!
//! # Responsibilities
//! - Detect WebSocket upgrade requests and the tunnel path
//! - Detect binary media GET requests by path marker
//! - Everything else is generic forwarding
//!
//! # Design Decisions
//! - Path matching is case-sensitive substring matching (markers come in
//!   both `/Videos/` and `/video/` spellings, each listed explicitly)
//! - Upgrade header tokens are matched case-insensitively
//! - No regex to guarantee O(n) matching

use std::fmt;

use axum::http::{header, HeaderMap, Method};

use crate::config::{MediaConfig, TunnelConfig};

/// Which component handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// WebSocket tunnel (or the tunnel path without a valid upgrade).
    Tunnel,
    /// Binary media relay with re-chunking.
    Media,
    /// Plain streaming forwarder.
    Generic,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Tunnel => "tunnel",
            RouteClass::Media => "media",
            RouteClass::Generic => "generic",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true if the request asks for a WebSocket upgrade.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::UPGRADE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("websocket"))
        })
}

/// Immutable classifier compiled from configuration at startup.
#[derive(Debug, Clone)]
pub struct RouteClassifier {
    tunnel_path: String,
    media_markers: Vec<String>,
}

impl RouteClassifier {
    pub fn new(tunnel: &TunnelConfig, media: &MediaConfig) -> Self {
        Self {
            tunnel_path: tunnel.path.clone(),
            media_markers: media.path_markers.clone(),
        }
    }

    /// True for the tunnel path itself and anything below it.
    pub fn is_tunnel_path(&self, path: &str) -> bool {
        match path.strip_prefix(self.tunnel_path.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// True if the path contains one of the media markers.
    pub fn is_media_path(&self, path: &str) -> bool {
        self.media_markers.iter().any(|m| path.contains(m.as_str()))
    }

    /// Classify a request. Upgrades win over media, media over generic.
    /// Only GET is relayed as media; other methods on media paths (HEAD,
    /// session deletes, ...) use the plain forwarder.
    pub fn classify(&self, method: &Method, path: &str, headers: &HeaderMap) -> RouteClass {
        if self.is_tunnel_path(path) || is_websocket_upgrade(headers) {
            RouteClass::Tunnel
        } else if method == Method::GET && self.is_media_path(path) {
            RouteClass::Media
        } else {
            RouteClass::Generic
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn classifier() -> RouteClassifier {
        RouteClassifier::new(&TunnelConfig::default(), &MediaConfig::default())
    }

    fn upgrade_headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::UPGRADE, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn media_paths_in_both_spellings() {
        let c = classifier();
        let none = HeaderMap::new();
        for path in [
            "/Videos/42/stream.mkv",
            "/emby/Audio/7/universal",
            "/web/video/1",
            "/audio/2/stream",
        ] {
            assert_eq!(c.classify(&Method::GET, path, &none), RouteClass::Media, "{path}");
        }
        assert_eq!(c.classify(&Method::GET, "/Users/1/Items", &none), RouteClass::Generic);
    }

    #[test]
    fn media_requires_get() {
        let c = classifier();
        let none = HeaderMap::new();
        assert_eq!(
            c.classify(&Method::HEAD, "/Videos/42/stream", &none),
            RouteClass::Generic
        );
        assert_eq!(
            c.classify(&Method::POST, "/Videos/ActiveEncodings/Delete", &none),
            RouteClass::Generic
        );
    }

    #[test]
    fn tunnel_path_and_upgrades() {
        let c = classifier();
        let none = HeaderMap::new();
        assert_eq!(c.classify(&Method::GET, "/embywebsocket", &none), RouteClass::Tunnel);
        assert_eq!(
            c.classify(&Method::GET, "/embywebsocketx", &none),
            RouteClass::Generic
        );
        assert_eq!(
            c.classify(&Method::GET, "/socket", &upgrade_headers("WebSocket")),
            RouteClass::Tunnel
        );
        assert_eq!(
            c.classify(&Method::GET, "/Videos/1/live", &upgrade_headers("websocket")),
            RouteClass::Tunnel
        );
    }

    #[test]
    fn upgrade_header_tokens() {
        assert!(is_websocket_upgrade(&upgrade_headers("h2c, websocket")));
        assert!(!is_websocket_upgrade(&upgrade_headers("h2c")));
        assert!(!is_websocket_upgrade(&HeaderMap::new()));
    }
}
