//! Streaming response body for a packaged archive.
//!
//! The body owns the session's [`DeliveryCompletion`], so the session is
//! removed as soon as the last byte is handed to the connection or the
//! body is dropped early (client went away, request timed out).

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::{header, StatusCode};
use axum::response::Response;
use futures::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use planmark_pipeline::{Delivery, DeliveryCompletion};

use crate::error::{AppError, AppResult};

/// Chunks of the archive file, followed by session cleanup.
#[derive(Debug)]
pub struct ArchiveBody {
    inner: ReaderStream<File>,
    completion: Option<DeliveryCompletion>,
}

impl ArchiveBody {
    pub fn new(file: File, completion: DeliveryCompletion) -> Self {
        Self {
            inner: ReaderStream::new(file),
            completion: Some(completion),
        }
    }
}

impl Stream for ArchiveBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        match &polled {
            Poll::Ready(None) => {
                if let Some(mut completion) = self.completion.take() {
                    completion.mark_transmitted();
                }
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::error!(error = %e, "Failed to read archive while streaming");
                // Dropping here logs the delivery as interrupted.
                self.completion.take();
            }
            _ => {}
        }
        polled
    }
}

/// Build the `200 application/zip` attachment response for a delivery.
pub fn archive_response(delivery: Delivery) -> AppResult<Response> {
    let file_name = delivery.file_name();
    let size_bytes = delivery.size_bytes();
    let (file, completion) = delivery.into_parts();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        )
        .header(header::CONTENT_LENGTH, size_bytes.to_string())
        .body(Body::from_stream(ArchiveBody::new(file, completion)))
        .map_err(|e| AppError::InternalError(e.to_string()))
}
