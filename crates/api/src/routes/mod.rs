pub mod health;

use axum::routing::post;
use axum::Router;

use crate::error;
use crate::handlers;
use crate::state::AppState;

/// Build the `/api` route tree.
///
/// ```text
/// /smartplanmark/process     POST   multipart (pdf, csv) -> application/zip
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().route(
        "/smartplanmark/process",
        post(handlers::process::process_upload)
            .fallback(|| async { error::method_not_allowed("POST") }),
    )
}
