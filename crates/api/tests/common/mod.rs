#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::{NamedTempFile, TempDir};
use tower::ServiceExt;

use planmark_api::config::{PipelineConfig, ServerConfig};
use planmark_api::router::build_app_router;
use planmark_api::state::AppState;
use planmark_core::intake::{DEFAULT_MAX_DOCUMENT_BYTES, DEFAULT_MAX_TABLE_BYTES};

pub const BOUNDARY: &str = "planmark-test-boundary";

/// A running test application with its own session root and worker script.
///
/// The worker is a bash script receiving the real argument contract:
/// `$2` is the PDF, `$4` the CSV and `$6` the output directory. Its working
/// directory is `project_root`, so scripts can leave marker files there.
pub struct TestApp {
    pub app: Router,
    pub session_root: TempDir,
    pub project_root: TempDir,
    _script: NamedTempFile,
}

impl TestApp {
    /// Session directories currently present under the session root.
    pub fn sessions(&self) -> Vec<PathBuf> {
        session_dirs(self.session_root.path())
    }

    /// Wait for every session directory to be removed.
    ///
    /// Cleanup after delivery or cancellation runs on a blocking thread, so
    /// it can land shortly after the response completes.
    pub async fn sessions_cleaned(&self) -> bool {
        for _ in 0..250 {
            if self.sessions().is_empty() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    /// Whether the worker left `name` in its working directory.
    pub fn marker_exists(&self, name: &str) -> bool {
        self.project_root.path().join(name).exists()
    }
}

/// Build a test `ServerConfig` with safe defaults around the given worker.
pub fn test_config(session_root: &Path, project_root: &Path, script: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        pipeline: PipelineConfig {
            session_root: session_root.to_path_buf(),
            worker_program: "bash".to_string(),
            worker_entrypoint: vec![script.to_string_lossy().into_owned()],
            worker_project_root: project_root.to_path_buf(),
            worker_timeout_secs: 10,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            max_table_bytes: DEFAULT_MAX_TABLE_BYTES,
        },
    }
}

/// Build the full application with the same router production uses.
pub fn build_test_app(script_body: &str) -> TestApp {
    build_test_app_with(script_body, |_| {})
}

/// Like [`build_test_app`], with a hook to adjust the configuration.
pub fn build_test_app_with(script_body: &str, tweak: impl FnOnce(&mut ServerConfig)) -> TestApp {
    let session_root = tempfile::tempdir().unwrap();
    let project_root = tempfile::tempdir().unwrap();

    let mut script = tempfile::Builder::new().suffix(".sh").tempfile().unwrap();
    writeln!(script, "set -e").unwrap();
    script.write_all(script_body.as_bytes()).unwrap();
    script.flush().unwrap();

    let mut config = test_config(session_root.path(), project_root.path(), script.path());
    tweak(&mut config);

    let state = AppState::new(config.clone());
    let app = build_app_router(state, &config);

    TestApp {
        app,
        session_root,
        project_root,
        _script: script,
    }
}

/// Worker that writes `a.txt` and `sub/b.txt` into its output directory.
pub const WRITING_WORKER: &str = r#"
mkdir -p "$6/sub"
printf 'alpha' > "$6/a.txt"
printf 'bravo' > "$6/sub/b.txt"
"#;

/// Whether `pid` is a live process. Zombies count as dead.
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => {
            let state = stat
                .rsplit_once(") ")
                .and_then(|(_, rest)| rest.chars().next());
            !matches!(state, Some('Z') | Some('X'))
        }
        Err(_) => false,
    }
}

pub fn session_dirs(root: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(root)
        .map(|entries| entries.map(|e| e.unwrap().path()).collect())
        .unwrap_or_default()
}

/// One part of a multipart form.
pub struct Part {
    pub name: &'static str,
    pub file_name: Option<&'static str>,
    pub content_type: Option<&'static str>,
    pub data: Vec<u8>,
}

impl Part {
    pub fn pdf(data: &[u8]) -> Self {
        Self {
            name: "pdf",
            file_name: Some("plano.pdf"),
            content_type: Some("application/pdf"),
            data: data.to_vec(),
        }
    }

    pub fn csv(data: &[u8]) -> Self {
        Self {
            name: "csv",
            file_name: Some("asignaciones.csv"),
            content_type: Some("text/csv"),
            data: data.to_vec(),
        }
    }
}

/// Encode `parts` as a `multipart/form-data` body using [`BOUNDARY`].
pub fn multipart_body(parts: &[Part]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
        if let Some(file_name) = part.file_name {
            disposition.push_str(&format!("; filename=\"{file_name}\""));
        }
        body.extend_from_slice(disposition.as_bytes());
        body.extend_from_slice(b"\r\n");
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// POST a multipart form to the processing endpoint.
pub async fn post_process(app: Router, parts: &[Part]) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/smartplanmark/process")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap();

    app.oneshot(request).await.unwrap()
}

/// Issue a GET request.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    app.oneshot(request).await.unwrap()
}

/// Collect a response body into bytes.
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = body_bytes(response).await;
    serde_json::from_slice(&bytes).unwrap()
}
