//! Resilience helpers for talking to backing services.
//!
//! # Data Flow
//! ```text
//! Connect attempt to a backing service:
//!     → On failure: backoff.rs yields the next delay (exponential, jittered)
//!     → Caller sleeps and retries until its attempt budget is spent
//! ```
//!
//! # Design Decisions
//! - Delays are capped so a long outage never stalls a retry for minutes
//! - Jitter keeps replicas from reconnecting in lockstep

pub mod backoff;
