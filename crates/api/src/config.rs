use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use planmark_core::intake::{UploadLimits, DEFAULT_MAX_DOCUMENT_BYTES, DEFAULT_MAX_TABLE_BYTES};
use planmark_core::worker::WorkerCommand;

/// Headroom for multipart framing on top of the two upload ceilings (1 MiB).
const MULTIPART_OVERHEAD_BYTES: u64 = 1024 * 1024;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `900`). Must exceed the
    /// worker timeout, otherwise the worker is cut off by the HTTP layer.
    pub request_timeout_secs: u64,
    /// Session workspace and worker settings.
    pub pipeline: PipelineConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                    |
    /// |------------------------|----------------------------|
    /// | `HOST`                 | `0.0.0.0`                  |
    /// | `PORT`                 | `3000`                     |
    /// | `CORS_ORIGINS`         | `http://localhost:3000`    |
    /// | `REQUEST_TIMEOUT_SECS` | `900`                      |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = parse_env("PORT", 3000);

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = parse_env("REQUEST_TIMEOUT_SECS", 900);

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            pipeline: PipelineConfig::from_env(),
        }
    }
}

/// Where sessions live and how the worker is launched.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent directory of all session workspaces.
    pub session_root: PathBuf,
    /// Worker interpreter or executable.
    pub worker_program: String,
    /// Arguments placed before the `--pdf/--csv/--output` contract flags.
    pub worker_entrypoint: Vec<String>,
    /// Working directory of the worker.
    pub worker_project_root: PathBuf,
    /// Worker wall-clock limit in seconds; `0` disables it.
    pub worker_timeout_secs: u64,
    pub max_document_bytes: u64,
    pub max_table_bytes: u64,
}

impl PipelineConfig {
    /// Load pipeline settings from environment variables with defaults.
    ///
    /// | Env Var               | Default                         |
    /// |-----------------------|---------------------------------|
    /// | `SESSION_ROOT`        | `<system temp>/smartplanmark`   |
    /// | `WORKER_INTERPRETER`  | `python`                        |
    /// | `WORKER_ENTRYPOINT`   | `-m src.main`                   |
    /// | `WORKER_PROJECT_ROOT` | `.`                             |
    /// | `WORKER_TIMEOUT_SECS` | `600`                           |
    /// | `MAX_DOCUMENT_BYTES`  | `52428800` (50 MiB)             |
    /// | `MAX_TABLE_BYTES`     | `5242880` (5 MiB)               |
    pub fn from_env() -> Self {
        let session_root = std::env::var("SESSION_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::temp_dir().join("smartplanmark"));

        let worker_program =
            std::env::var("WORKER_INTERPRETER").unwrap_or_else(|_| "python".into());

        let worker_entrypoint: Vec<String> = std::env::var("WORKER_ENTRYPOINT")
            .unwrap_or_else(|_| "-m src.main".into())
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let worker_project_root = std::env::var("WORKER_PROJECT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        Self {
            session_root,
            worker_program,
            worker_entrypoint,
            worker_project_root,
            worker_timeout_secs: parse_env("WORKER_TIMEOUT_SECS", 600),
            max_document_bytes: parse_env("MAX_DOCUMENT_BYTES", DEFAULT_MAX_DOCUMENT_BYTES),
            max_table_bytes: parse_env("MAX_TABLE_BYTES", DEFAULT_MAX_TABLE_BYTES),
        }
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_document_bytes: self.max_document_bytes,
            max_table_bytes: self.max_table_bytes,
        }
    }

    pub fn worker_timeout(&self) -> Option<Duration> {
        (self.worker_timeout_secs > 0).then(|| Duration::from_secs(self.worker_timeout_secs))
    }

    pub fn worker_command(&self) -> WorkerCommand {
        let mut command =
            WorkerCommand::new(self.worker_program.clone(), self.worker_entrypoint.clone());
        command.working_dir = self.worker_project_root.clone();
        command.timeout = self.worker_timeout();
        command
    }

    /// Request body limit: both upload ceilings plus multipart framing.
    pub fn body_limit_bytes(&self) -> usize {
        usize::try_from(self.upload_limits().total_bytes() + MULTIPART_OVERHEAD_BYTES)
            .unwrap_or(usize::MAX)
    }
}

/// Read and parse `key`, falling back to `default` when unset.
///
/// Panics on an unparsable value: misconfiguration must stop startup.
fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
