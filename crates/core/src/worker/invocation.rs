//! Worker command description, invocation record and the [`Worker`] trait.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::error::WorkerError;
use crate::session::Session;

/// Environment forced on every worker so its text output is UTF-8 and
/// reaches us line by line instead of in buffered bursts.
pub const WORKER_ENV: &[(&str, &str)] = &[("PYTHONIOENCODING", "utf-8"), ("PYTHONUNBUFFERED", "1")];

/// How to launch the worker.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    /// Interpreter or executable, resolved through `PATH`.
    pub program: String,
    /// Arguments placed before the contract flags (e.g. `-m src.main`).
    pub entrypoint: Vec<String>,
    /// Working directory of the worker (the project root).
    pub working_dir: PathBuf,
    /// Extra environment on top of the inherited one.
    pub env_vars: Vec<(String, String)>,
    /// Wall-clock bound; `None` lets the worker run until it exits.
    pub timeout: Option<Duration>,
}

impl WorkerCommand {
    /// Build a command with the forced worker environment, the current
    /// directory as project root and no timeout.
    pub fn new(program: impl Into<String>, entrypoint: Vec<String>) -> Self {
        Self {
            program: program.into(),
            entrypoint,
            working_dir: PathBuf::from("."),
            env_vars: WORKER_ENV
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            timeout: None,
        }
    }

    /// Full argument list for one invocation.
    pub fn args_for(&self, document: &Path, table: &Path, output_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.entrypoint.iter().map(OsString::from).collect();
        args.extend([
            OsString::from("--pdf"),
            document.as_os_str().to_owned(),
            OsString::from("--csv"),
            table.as_os_str().to_owned(),
            OsString::from("--output"),
            output_dir.as_os_str().to_owned(),
        ]);
        args
    }
}

/// Record of one completed worker run.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerInvocation {
    pub args: Vec<String>,
    pub stdout: String,
    pub stderr: String,
    /// `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl WorkerInvocation {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs the worker for one session.
///
/// Resolves once the worker has terminated. Only a successful exit yields
/// `Ok`; non-zero exits, launch failures and timeouts are [`WorkerError`]s.
pub trait Worker: Send + Sync {
    fn invoke(
        &self,
        session: &Session,
        document: &Path,
        table: &Path,
    ) -> impl Future<Output = Result<WorkerInvocation, WorkerError>> + Send;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
