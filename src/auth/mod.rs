//! Authentication data bootstrap.
//!
//! Only the seed data (permissions, system roles, default organization and
//! group) lives here; token handling and login flows are served elsewhere.

pub mod seed;

pub use seed::{
    bootstrap_auth_system, check_if_seeded, seed_default_group, seed_default_organization,
    seed_default_roles, seed_permissions, SeedSummary, DEFAULT_ROLES, STANDARD_PERMISSIONS,
};
