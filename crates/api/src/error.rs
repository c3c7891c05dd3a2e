use std::any::Any;

use axum::http::header::{ALLOW, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use planmark_core::error::{PackagingError, PipelineError};

/// Application-level error type for HTTP handlers.
///
/// Wraps [`PipelineError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A failure of the processing pipeline.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- Pipeline errors ---
            AppError::Pipeline(pipeline) => classify_pipeline_error(pipeline),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        error_response(status, code, message)
    }
}

/// Map a pipeline error to an HTTP status, error code, and message.
///
/// - Validation errors map to 400 with the validation message.
/// - Worker errors map to 500 and keep the captured diagnostics.
/// - Workspace errors map to 500 with a sanitized message (no paths).
fn classify_pipeline_error(err: &PipelineError) -> (StatusCode, &'static str, String) {
    match err {
        PipelineError::Validation(e) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string()),
        PipelineError::Workspace(e) => {
            tracing::error!(error = %e, "Workspace error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "WORKSPACE_ERROR",
                "Failed to allocate session storage".to_string(),
            )
        }
        PipelineError::Worker(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "WORKER_ERROR",
            e.to_string(),
        ),
        PipelineError::Packaging(e) => {
            let message = match e {
                PackagingError::MissingOutput(_) => {
                    "Worker did not create its output directory".to_string()
                }
                PackagingError::EmptyOutput => e.to_string(),
                other => {
                    tracing::error!(error = %other, "Packaging error");
                    "Failed to package worker output".to_string()
                }
            };
            (StatusCode::INTERNAL_SERVER_ERROR, "PACKAGING_ERROR", message)
        }
    }
}

fn error_response(status: StatusCode, code: &str, message: String) -> Response {
    let body = json!({
        "error": message,
        "code": code,
    });

    (status, axum::Json(body)).into_response()
}

/// Fallback for unmatched routes.
pub async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "NOT_FOUND", "Route not found".to_string())
}

/// 405 for a route that exists but not for this method.
pub fn method_not_allowed(allow: &'static str) -> Response {
    let mut response = error_response(
        StatusCode::METHOD_NOT_ALLOWED,
        "METHOD_NOT_ALLOWED",
        format!("Method not allowed, use {allow}"),
    );
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static(allow));
    response
}

/// Give the bare 408 produced by `TimeoutLayer` the usual JSON error body.
pub async fn render_timeout(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT
        && !response.headers().contains_key(CONTENT_TYPE)
    {
        tracing::warn!("Request exceeded the request timeout");
        return error_response(
            StatusCode::REQUEST_TIMEOUT,
            "REQUEST_TIMEOUT",
            "Request timed out".to_string(),
        );
    }
    response
}

/// Panic handler for `CatchPanicLayer`: a JSON 500 like every other error.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = %detail, "Handler panicked");

    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
