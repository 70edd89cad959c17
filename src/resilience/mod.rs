//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → timeouts.rs (pick the deadline for this path/method)
//!     → forwarder enforces it around the upstream call
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - No retries: one attempt per inbound request, since a partially
//!   streamed body or a live session cannot be replayed safely

pub mod timeouts;

pub use timeouts::TimeoutPolicy;
