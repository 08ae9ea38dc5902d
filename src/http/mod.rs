//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (request ID, tracing, timeout, rate limit, metrics)
//!     → handlers.rs (root banner, service status, organization/role/group listings)
//!     → error.rs (graph failures as JSON 502/503)
//!     → Send to client
//! ```

pub mod error;
pub mod handlers;
pub mod server;

pub use error::ApiError;
pub use server::{build_router, AppState, HttpServer};
