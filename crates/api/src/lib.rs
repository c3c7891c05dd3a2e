//! SmartPlanMark API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes,
//! archive download body) so integration tests and the binary entrypoint
//! can both access them.

pub mod config;
pub mod download;
pub mod error;
pub mod handlers;
pub mod router;
pub mod routes;
pub mod state;
