use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use planmark_api::config::ServerConfig;
use planmark_api::router::build_app_router;
use planmark_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "planmark_api=debug,planmark_pipeline=debug,planmark_core=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");
    tracing::info!(
        session_root = %config.pipeline.session_root.display(),
        worker = %config.pipeline.worker_program,
        entrypoint = ?config.pipeline.worker_entrypoint,
        project_root = %config.pipeline.worker_project_root.display(),
        worker_timeout_secs = config.pipeline.worker_timeout_secs,
        "Loaded pipeline configuration"
    );
    if config.pipeline.worker_timeout_secs == 0
        || config.pipeline.worker_timeout_secs >= config.request_timeout_secs
    {
        tracing::warn!(
            worker_timeout_secs = config.pipeline.worker_timeout_secs,
            request_timeout_secs = config.request_timeout_secs,
            "Request timeout does not exceed the worker timeout; long runs will be cut off by HTTP"
        );
    }

    // --- Session root ---
    tokio::fs::create_dir_all(&config.pipeline.session_root)
        .await
        .expect("Failed to create session root directory");

    // --- App state + router ---
    let state = AppState::new(config.clone());
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Graceful shutdown complete");
}

/// Resolve on SIGINT or, on Unix, SIGTERM.
///
/// In-flight requests are allowed to finish, so their sessions are still
/// cleaned up by the normal path.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => tracing::info!("SIGINT received, shutting down"),
        () = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}
