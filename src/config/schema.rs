//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// The single upstream media server.
    pub upstream: UpstreamConfig,

    /// Listener configuration (bind address, connection limits).
    pub listener: ListenerConfig,

    /// Route-dependent timeout table.
    pub timeouts: TimeoutConfig,

    /// Response and request header rules.
    pub headers: HeaderConfig,

    /// Media stream relay settings.
    pub media: MediaConfig,

    /// WebSocket tunnel settings.
    pub tunnel: TunnelConfig,

    /// Request body limits.
    pub limits: LimitsConfig,

    /// Response compression.
    pub compression: CompressionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Upstream server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the upstream (e.g., "https://media.example.com:8920").
    /// Only scheme, host and port are used.
    pub url: String,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Disable Nagle's algorithm on accepted sockets.
    pub tcp_nodelay: bool,

    /// How long in-flight connections may drain after a shutdown signal.
    pub shutdown_grace_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
            tcp_nodelay: true,
            shutdown_grace_secs: 10,
        }
    }
}

/// Timeout configuration.
///
/// Rules are checked in order and the first one whose `contains` pattern
/// appears in the request path wins, so the most specific patterns go first.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Timeout used when no rule matches, in milliseconds.
    pub default_ms: u64,

    /// Upstream TCP connect timeout in milliseconds.
    pub connect_ms: u64,

    /// Ordered path rules.
    pub rules: Vec<TimeoutRule>,
}

/// A single entry of the timeout table.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TimeoutRule {
    /// Substring matched against the request path (case-sensitive).
    pub contains: String,

    /// Timeout applied on match, in milliseconds.
    pub timeout_ms: u64,

    /// Restrict the rule to these methods. Empty means any method.
    #[serde(default)]
    pub methods: Vec<String>,
}

impl TimeoutRule {
    pub fn new(contains: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            contains: contains.into(),
            timeout_ms,
            methods: Vec::new(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_ms: 10_000,
            connect_ms: 5_000,
            rules: vec![
                TimeoutRule::new("/Videos/", 300_000),
                TimeoutRule::new("/Audio/", 300_000),
                TimeoutRule::new("PlaybackInfo", 30_000),
                TimeoutRule::new("/Sessions/", 30_000),
            ],
        }
    }
}

/// Header rewriting rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaderConfig {
    /// Upstream response headers that are never passed to clients.
    pub strip_response_headers: Vec<String>,

    /// Value of `Access-Control-Allow-Origin`.
    pub allow_origin: String,

    /// `Access-Control-Allow-Methods` for media routes.
    pub media_allow_methods: String,

    /// `Access-Control-Allow-Methods` for every other route.
    pub default_allow_methods: String,

    /// Value of `Access-Control-Allow-Headers`.
    pub allow_headers: String,

    /// `Cache-Control` forced on video/audio responses.
    pub media_cache_control: String,

    /// `Cache-Control` used when the upstream sends none.
    pub default_cache_control: String,

    /// Value sent upstream as `X-Forwarded-Proto`.
    pub forwarded_proto: String,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            strip_response_headers: vec![
                "strict-transport-security".to_string(),
                "content-security-policy".to_string(),
            ],
            allow_origin: "*".to_string(),
            media_allow_methods: "GET".to_string(),
            default_allow_methods: "GET, POST, PUT, DELETE, OPTIONS".to_string(),
            allow_headers: "*".to_string(),
            media_cache_control: "public, max-age=3600".to_string(),
            default_cache_control: "public, max-age=0, must-revalidate".to_string(),
            forwarded_proto: "https".to_string(),
        }
    }
}

/// Media stream relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Path substrings that mark a GET request as binary media.
    pub path_markers: Vec<String>,

    /// Size of every relayed frame except the last one, in bytes.
    pub frame_size: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            path_markers: vec![
                "/Videos/".to_string(),
                "/Audio/".to_string(),
                "/video/".to_string(),
                "/audio/".to_string(),
            ],
            frame_size: 64 * 1024,
        }
    }
}

/// How upgrade requests are handled.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TunnelMode {
    /// Full bidirectional relay to the upstream.
    #[default]
    Tunnel,
    /// Reject upgrades with 426 so clients fall back to HTTP polling.
    HttpFallback,
}

/// WebSocket tunnel configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// Path of the upstream's live-event socket.
    pub path: String,

    pub mode: TunnelMode,

    /// Time the second direction gets to wind down once the first has ended.
    pub close_grace_ms: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            path: "/embywebsocket".to_string(),
            mode: TunnelMode::Tunnel,
            close_grace_ms: 5_000,
        }
    }
}

/// Request body limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body forwarded upstream, in bytes.
    pub max_request_body_bytes: usize,

    /// Buffer request bodies before forwarding instead of streaming them.
    /// Only needed for upstreams that refuse chunked uploads.
    pub buffer_request_body: bool,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_request_body_bytes: 100 * 1024 * 1024, // 100MB
            buffer_request_body: false,
        }
    }
}

/// Response compression configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress non-media responses (gzip, br).
    pub enabled: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
