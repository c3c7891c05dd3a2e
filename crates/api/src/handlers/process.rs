//! Handler for the document processing endpoint.

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::response::Response;

use planmark_core::error::{PipelineError, ValidationError};
use planmark_core::intake::PartHeader;
use planmark_core::worker::Worker;
use planmark_pipeline::PipelineRun;

use crate::download;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// POST /api/smartplanmark/process
///
/// Accepts a multipart form with a `pdf` and a `csv` file part, runs the
/// worker in a fresh session and streams the zipped output back. The
/// session directory is gone once the response ends, whatever the outcome.
pub async fn process_upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Response> {
    let multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let mut run = state.pipeline.start().await?;
    let intake = receive_uploads(&mut run, multipart).await;
    let delivery = run.finish(intake).await?;

    tracing::info!(
        session_id = ?delivery.session_id(),
        entries = delivery.summary().entries.len(),
        size_bytes = delivery.size_bytes(),
        "Streaming archive",
    );
    download::archive_response(delivery)
}

/// Feed every multipart part into the run, stopping at the first error.
async fn receive_uploads<W: Worker>(
    run: &mut PipelineRun<'_, W>,
    mut multipart: Multipart,
) -> Result<(), PipelineError> {
    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let header = PartHeader {
            field_name: field.name().unwrap_or_default().to_string(),
            file_name: field.file_name().map(str::to_string),
            content_type: field.content_type().map(str::to_string),
        };
        run.receive_part(&header, field).await?;
    }
    Ok(())
}

fn malformed(err: MultipartError) -> PipelineError {
    ValidationError::Malformed(err.body_text()).into()
}
