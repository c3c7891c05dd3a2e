//! External worker invocation.
//!
//! The worker is an opaque executable with a fixed CLI contract:
//! `<program> <entrypoint...> --pdf <path> --csv <path> --output <dir>`.
//! Exit code 0 means success; anything else is a failure whose stderr is
//! kept for diagnostics.

pub mod invocation;
pub mod subprocess;

pub use invocation::{Worker, WorkerCommand, WorkerInvocation};
pub use subprocess::SubprocessWorker;
