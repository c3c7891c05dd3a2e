//! Error kinds produced while processing one upload session.
//!
//! Each component owns one enum; [`PipelineError`] aggregates them so the
//! orchestrator and the HTTP layer deal with a single type.

use std::io;
use std::path::PathBuf;

use crate::intake::UploadRole;

/// Bad upload shape, type or size. Always detected before the worker runs.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Both files are required: missing {role} upload")]
    Missing { role: UploadRole },

    #[error("Only one {role} file may be uploaded")]
    Duplicate { role: UploadRole },

    #[error("{role} upload has no file name")]
    MissingFileName { role: UploadRole },

    #[error("{role} must have a {expected} extension, got '{file_name}'")]
    Extension {
        role: UploadRole,
        expected: &'static str,
        file_name: String,
    },

    #[error("{role} content type '{content_type}' is not accepted")]
    ContentType {
        role: UploadRole,
        content_type: String,
    },

    #[error("{role} exceeds the {limit_bytes} byte limit")]
    TooLarge { role: UploadRole, limit_bytes: u64 },

    #[error("{role} file is empty")]
    Empty { role: UploadRole },

    #[error("Malformed upload: {0}")]
    Malformed(String),
}

/// Session storage could not be provided.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("Failed to create session directory {}: {source}", .path.display())]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// The external worker could not be run to a successful exit.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Failed to launch worker '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Worker exited with {}: {stderr}", exit_label(.exit_code))]
    Failed {
        /// `None` when the process was terminated by a signal.
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Worker timed out after {elapsed_ms}ms: {stderr}")]
    Timeout { elapsed_ms: u64, stderr: String },

    #[error("I/O error while supervising worker: {0}")]
    Io(#[from] io::Error),
}

fn exit_label(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

/// The worker's output could not be turned into an archive.
#[derive(Debug, thiserror::Error)]
pub enum PackagingError {
    #[error("Worker output directory {} does not exist", .0.display())]
    MissingOutput(PathBuf),

    #[error("Worker finished successfully but produced no output files")]
    EmptyOutput,

    #[error("Failed to write archive: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to write archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Archive task aborted: {0}")]
    Task(String),
}

/// Any failure of a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Worker(#[from] WorkerError),

    #[error(transparent)]
    Packaging(#[from] PackagingError),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
