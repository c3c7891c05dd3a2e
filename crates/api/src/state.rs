use std::sync::Arc;

use planmark_core::session::WorkspaceManager;
use planmark_core::worker::SubprocessWorker;
use planmark_pipeline::Pipeline;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`). Nothing in it is
/// request-specific: each request gets its own session from the pipeline.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// The processing pipeline (session workspaces, worker, limits).
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    /// Build the state, wiring the pipeline from `config.pipeline`.
    pub fn new(config: ServerConfig) -> Self {
        let pipeline = Pipeline::new(
            WorkspaceManager::new(&config.pipeline.session_root),
            SubprocessWorker::new(config.pipeline.worker_command()),
            config.pipeline.upload_limits(),
        );

        Self {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
        }
    }
}
