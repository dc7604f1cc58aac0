//! service-core: Shared infrastructure for the CMS backend services.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
