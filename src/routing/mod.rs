//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path, headers)
//!     → classify.rs (tunnel / media / generic)
//!     → upstream.rs (absolute upstream URL for the same path)
//! ```
//!
//! # Design Decisions
//! - A single upstream; routing only decides *how* a request is relayed
//! - Classifier compiled at startup, immutable at runtime
//! - Deterministic: same input always yields the same class

pub mod classify;
pub mod upstream;

pub use classify::{is_websocket_upgrade, RouteClass, RouteClassifier};
pub use upstream::{UpstreamError, UpstreamTarget};
