//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → limits.rs (request body cap)
//!     → headers.rs (hop-by-hop stripping, Host rewrite, X-Forwarded-*)
//!     → Forward upstream
//!
//! Upstream response:
//!     → headers.rs (strip HSTS/CSP, CORS, cache-control, media framing)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - Header rules are pure functions compiled from config
//! - Limits fail closed: an oversized body is never partially accepted

pub mod headers;
pub mod limits;

pub use headers::{HeaderPolicy, ResponseContext};
pub use limits::{BodyLimits, BodyTooLarge};
