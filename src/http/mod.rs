//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (hyper-util connection, middleware, dispatch)
//!     → request.rs (request ID, RequestContext)
//!     → websocket.rs | media.rs | forward.rs
//!     → body.rs (idle timeout, media re-framing)
//!     → response.rs (assembly, JSON errors)
//!     → Send to client
//! ```

pub mod body;
pub mod forward;
pub mod media;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::{MakeRequestUuidV4, RequestContext, X_REQUEST_ID};
pub use server::{AppState, HttpServer, ProxyState, ServerError};
