//! Reverse proxy for a single Emby media server.
//!
//! Accepts client HTTP and WebSocket traffic and relays it to one upstream,
//! rewriting headers so browser clients work behind it.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::listener ──▶ http::server ──▶ routing::classify
//!                                                        │
//!                     ┌──────────────────────────────────┼───────────────────┐
//!                     ▼                                  ▼                   ▼
//!             http::websocket                      http::media         http::forward
//!             (tunnel, frames)               (Range, 64 KiB frames)    (everything else)
//!                     │                                  │                   │
//!                     └──────────────── upstream Emby ◀──┴───────────────────┘
//!
//!     Cross-cutting: config, security (headers, limits), resilience (timeouts),
//!                    observability, lifecycle, health
//! ```

// Core subsystems
pub mod config;
pub mod error;
pub mod http;
pub mod net;
pub mod routing;

// Cross-cutting concerns
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::ProxyConfig;
pub use error::ProxyError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
