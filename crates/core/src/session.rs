//! Session workspace management.
//!
//! Every request gets its own directory `{base_dir}/{session_id}/` with an
//! `output/` subdirectory for the worker. Nothing is shared between
//! sessions, so no locking is needed across requests.
//!
//! Teardown goes through [`SessionGuard`]: the orchestrator releases it
//! explicitly, and its `Drop` removes the directory if the guard is dropped
//! instead (cancelled request, finished download). Inside a Tokio runtime
//! that removal runs on the blocking pool.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::WorkspaceError;

/// Name of the worker output directory inside a session.
pub const OUTPUT_DIR_NAME: &str = "output";

/// Opaque, statistically unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The isolated filesystem scope of one request.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    root: PathBuf,
    created_at: DateTime<Utc>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The session directory. All session files live under it.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory the worker writes its results into.
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(OUTPUT_DIR_NAME)
    }

    /// Path of a file placed directly in the session directory.
    pub fn file_path(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Allocates session directories under a common base directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create a new session directory and its `output/` subdirectory.
    ///
    /// The session directory itself is created with `create_dir`, so an
    /// identifier collision surfaces as an error instead of two requests
    /// silently sharing a directory.
    pub async fn create_session(&self) -> Result<Session, WorkspaceError> {
        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: self.base_dir.clone(),
                source,
            })?;

        let id = SessionId::new();
        let root = self.base_dir.join(id.to_string());
        tokio::fs::create_dir(&root)
            .await
            .map_err(|source| WorkspaceError::Create {
                path: root.clone(),
                source,
            })?;

        let session = Session {
            id,
            root,
            created_at: Utc::now(),
        };

        let output_dir = session.output_dir();
        if let Err(source) = tokio::fs::create_dir(&output_dir).await {
            destroy_session(&session).await;
            return Err(WorkspaceError::Create {
                path: output_dir,
                source,
            });
        }

        tracing::debug!(session_id = %session.id, path = %session.root.display(), "Session created");
        Ok(session)
    }
}

/// Recursively remove a session directory.
///
/// Idempotent: a directory that is already gone is not an error. Other
/// failures are logged and swallowed so teardown never masks the outcome of
/// the request.
pub async fn destroy_session(session: &Session) {
    let result = tokio::fs::remove_dir_all(&session.root).await;
    log_teardown(session, result);
}

fn destroy_session_blocking(session: &Session) {
    let result = std::fs::remove_dir_all(&session.root);
    log_teardown(session, result);
}

fn log_teardown(session: &Session, result: io::Result<()>) {
    match result {
        Ok(()) => {
            tracing::info!(session_id = %session.id, "Session files removed");
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(session_id = %session.id, "Session directory already removed");
        }
        Err(e) => {
            tracing::error!(
                session_id = %session.id,
                path = %session.root.display(),
                error = %e,
                "Failed to remove session directory",
            );
        }
    }
}

/// Owns a [`Session`] and guarantees its directory is removed exactly once.
#[derive(Debug)]
pub struct SessionGuard {
    session: Session,
    released: bool,
}

impl SessionGuard {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            released: false,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Remove the session directory now.
    pub async fn release(mut self) {
        destroy_session(&self.session).await;
        self.released = true;
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let session = self.session.clone();
                drop(runtime.spawn_blocking(move || destroy_session_blocking(&session)));
            }
            Err(_) => destroy_session_blocking(&self.session),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
