//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (check per-client token bucket)
//!     → Pass to handlers
//! ```
//!
//! # Design Decisions
//! - Limits are expressed as "N/period" strings in configuration
//! - Fail closed: an exhausted bucket rejects with 429 and Retry-After

pub mod rate_limit;
