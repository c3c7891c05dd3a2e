//! Session-scoped building blocks of the plan-marking service.
//!
//! Everything here is HTTP-agnostic: the session workspace, upload intake,
//! worker invocation and archive packaging. The `planmark-pipeline` crate
//! sequences these for one request.

pub mod archive;
pub mod error;
pub mod intake;
pub mod session;
pub mod worker;
