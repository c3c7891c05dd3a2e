//! Subprocess-backed [`Worker`].
//!
//! Spawns the configured program, logs stdout/stderr line by line while
//! accumulating both, and enforces the optional wall-clock timeout by
//! killing the worker's whole process group. The group is also killed when
//! the invocation future is dropped before the worker exits.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::invocation::{Worker, WorkerCommand, WorkerInvocation};
use crate::error::WorkerError;
use crate::session::{Session, SessionId};

/// Maximum stdout or stderr size captured per stream (10 MiB).
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Longest line forwarded to the log; the remainder of the line is dropped.
const MAX_LOG_LINE_BYTES: usize = 16 * 1024;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// How long to wait for output pipes to drain after the worker is gone.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy)]
enum OutputStream {
    Stdout,
    Stderr,
}

/// Runs the worker as a child process of the server.
#[derive(Debug, Clone)]
pub struct SubprocessWorker {
    command: WorkerCommand,
}

impl SubprocessWorker {
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }
}

impl Worker for SubprocessWorker {
    async fn invoke(
        &self,
        session: &Session,
        document: &Path,
        table: &Path,
    ) -> Result<WorkerInvocation, WorkerError> {
        let output_dir = session.output_dir();
        let args = self.command.args_for(document, table, &output_dir);

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&args)
            .current_dir(&self.command.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.command.env_vars {
            cmd.env(key, value);
        }
        // Own process group, so a timeout can take down grandchildren too.
        #[cfg(unix)]
        cmd.process_group(0);

        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        tracing::info!(
            session_id = %session.id(),
            program = %self.command.program,
            args = ?args,
            cwd = %self.command.working_dir.display(),
            "Launching worker",
        );

        let start = Instant::now();
        let child = cmd.spawn().map_err(|source| WorkerError::Launch {
            program: self.command.program.clone(),
            source,
        })?;
        let mut process = WorkerProcess::new(child, session.id());

        let waited = match self.command.timeout {
            Some(limit) => tokio::time::timeout(limit, process.child.wait()).await.ok(),
            None => Some(process.child.wait().await),
        };

        let Some(status) = waited else {
            process.kill().await;
            process.stdout.abort();
            let stderr = drain(&mut process.stderr).await;
            let elapsed_ms = start.elapsed().as_millis() as u64;
            tracing::error!(session_id = %session.id(), elapsed_ms, "Worker timed out and was killed");
            return Err(WorkerError::Timeout {
                elapsed_ms,
                stderr: stderr.trim_end().to_string(),
            });
        };
        let status = status?;
        process.reaped();

        let invocation = WorkerInvocation {
            args,
            stdout: drain(&mut process.stdout).await,
            stderr: drain(&mut process.stderr).await,
            exit_code: status.code(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        if !invocation.succeeded() {
            tracing::error!(
                session_id = %session.id(),
                exit_code = ?invocation.exit_code,
                "Worker failed",
            );
            return Err(WorkerError::Failed {
                exit_code: invocation.exit_code,
                stderr: invocation.stderr.trim_end().to_string(),
            });
        }

        tracing::info!(
            session_id = %session.id(),
            duration_ms = invocation.duration_ms,
            "Worker finished successfully",
        );
        Ok(invocation)
    }
}

/// A spawned worker together with its output readers.
///
/// Until the worker has been reaped, dropping this kills its whole process
/// group, so grandchildren do not outlive a cancelled request. The reader
/// tasks are aborted on drop in every case.
struct WorkerProcess {
    child: Child,
    pgid: Option<u32>,
    stdout: JoinHandle<Vec<u8>>,
    stderr: JoinHandle<Vec<u8>>,
    armed: bool,
}

impl WorkerProcess {
    fn new(mut child: Child, session_id: SessionId) -> Self {
        let stdout = tokio::spawn(pump(child.stdout.take(), OutputStream::Stdout, session_id));
        let stderr = tokio::spawn(pump(child.stderr.take(), OutputStream::Stderr, session_id));
        Self {
            pgid: child.id(),
            child,
            stdout,
            stderr,
            armed: true,
        }
    }

    /// Kill the group and the worker, then reap the worker.
    async fn kill(&mut self) {
        kill_group(self.pgid);
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "Worker already exited before kill");
        }
        self.armed = false;
    }

    /// The worker exited on its own; stragglers left in its group are killed
    /// so they cannot hold the output pipes open.
    fn reaped(&mut self) {
        kill_group(self.pgid);
        self.armed = false;
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(pgid = ?self.pgid, "Worker abandoned mid-run, killing its process group");
            kill_group(self.pgid);
        }
        self.stdout.abort();
        self.stderr.abort();
    }
}

fn kill_group(pgid: Option<u32>) {
    #[cfg(unix)]
    {
        if let Some(pgid) = pgid {
            // Safety: kill(2) takes plain integers; a negative pid targets the
            // process group created at spawn.
            unsafe {
                libc::kill(-(pgid as libc::pid_t), libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;
}

/// Log every line of `handle` as it arrives and return the captured bytes,
/// capped at [`MAX_OUTPUT_BYTES`].
///
/// Reads in fixed-size chunks, so memory stays bounded even for output
/// without line breaks.
async fn pump<R: AsyncRead + Unpin>(
    handle: Option<R>,
    stream: OutputStream,
    session_id: SessionId,
) -> Vec<u8> {
    let mut captured = Vec::new();
    let Some(mut handle) = handle else {
        return captured;
    };

    let mut chunk = vec![0u8; READ_CHUNK_BYTES];
    let mut line = LineBuffer::default();
    loop {
        match handle.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let bytes = &chunk[..n];
                let room = MAX_OUTPUT_BYTES.saturating_sub(captured.len());
                captured.extend_from_slice(&bytes[..n.min(room)]);
                for piece in bytes.split_inclusive(|&b| b == b'\n') {
                    if let Some(text) = line.push(piece) {
                        log_line(stream, session_id, &text);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%session_id, ?stream, error = %e, "Failed to read worker output");
                break;
            }
        }
    }
    if let Some(text) = line.take() {
        log_line(stream, session_id, &text);
    }
    captured
}

fn log_line(stream: OutputStream, session_id: SessionId, text: &str) {
    match stream {
        OutputStream::Stdout => tracing::info!(%session_id, "worker: {text}"),
        OutputStream::Stderr => tracing::warn!(%session_id, "worker stderr: {text}"),
    }
}

/// One output line in progress, holding at most [`MAX_LOG_LINE_BYTES`].
#[derive(Debug, Default)]
struct LineBuffer {
    bytes: Vec<u8>,
    truncated: bool,
}

impl LineBuffer {
    /// Append `piece`; returns the finished line once `piece` ends in `\n`.
    fn push(&mut self, piece: &[u8]) -> Option<String> {
        let (content, complete) = match piece.strip_suffix(b"\n") {
            Some(content) => (content, true),
            None => (piece, false),
        };
        let room = MAX_LOG_LINE_BYTES.saturating_sub(self.bytes.len());
        if content.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&content[..content.len().min(room)]);
        if complete {
            self.take()
        } else {
            None
        }
    }

    /// The pending line, if any, leaving the buffer empty.
    fn take(&mut self) -> Option<String> {
        if self.bytes.is_empty() && !self.truncated {
            return None;
        }
        let mut text = String::from_utf8_lossy(&self.bytes).trim_end().to_string();
        if self.truncated {
            text.push_str(" [truncated]");
        }
        self.bytes.clear();
        self.truncated = false;
        Some(text)
    }
}

/// Wait briefly for a reader task; a pipe still held open by a stray
/// process must not hold up the request.
async fn drain(task: &mut JoinHandle<Vec<u8>>) -> String {
    match tokio::time::timeout(OUTPUT_DRAIN_GRACE, &mut *task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
