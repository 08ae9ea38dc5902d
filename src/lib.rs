//! Imbi service lifecycle orchestrator.
//!
//! Brings up the graph store, analytics store and email transport before the
//! HTTP API accepts requests, and closes them again on shutdown.
//!
//! ```text
//!     config ──▶ services ──▶ lifecycle (startup) ──▶ auth seed ──▶ http
//!                                   ▲                                │
//!                                   └──── lifecycle (shutdown) ◀─────┘
//! ```

pub mod app;
pub mod auth;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod services;

pub use config::ImbiConfig;
pub use http::HttpServer;
pub use lifecycle::{Orchestrator, Shutdown};
pub use services::Services;
