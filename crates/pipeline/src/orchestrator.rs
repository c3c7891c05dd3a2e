//! The pipeline orchestrator.
//!
//! [`Pipeline::start`] allocates the session. The caller feeds multipart
//! parts through [`PipelineRun::receive_part`] and then hands the intake
//! outcome to [`PipelineRun::finish`], which runs the worker, packages its
//! output and returns a [`Delivery`]. On any failure the session is torn
//! down before the error is returned. On success the session lives until
//! the [`DeliveryCompletion`] is dropped, i.e. until the response body is
//! finished or abandoned.

use std::fmt;

use futures::Stream;
use tracing::{Instrument, Span};

use planmark_core::archive::{self, ArchiveSummary, ARCHIVE_FILE_NAME};
use planmark_core::error::{PackagingError, PipelineError};
use planmark_core::intake::{Intake, PartHeader, UploadLimits, UploadRole};
use planmark_core::session::{Session, SessionGuard, SessionId, WorkspaceManager};
use planmark_core::worker::{SubprocessWorker, Worker};

use crate::stage::PipelineStage;

/// Shared, request-independent pipeline configuration.
#[derive(Debug)]
pub struct Pipeline<W = SubprocessWorker> {
    workspace: WorkspaceManager,
    worker: W,
    limits: UploadLimits,
}

impl<W: Worker> Pipeline<W> {
    pub fn new(workspace: WorkspaceManager, worker: W, limits: UploadLimits) -> Self {
        Self {
            workspace,
            worker,
            limits,
        }
    }

    pub fn workspace(&self) -> &WorkspaceManager {
        &self.workspace
    }

    pub fn worker(&self) -> &W {
        &self.worker
    }

    pub fn limits(&self) -> UploadLimits {
        self.limits
    }

    /// Allocate a session and begin a run in the `Created` stage.
    pub async fn start(&self) -> Result<PipelineRun<'_, W>, PipelineError> {
        let session = self.workspace.create_session().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to allocate session workspace");
            e
        })?;

        let span = tracing::info_span!("pipeline", session_id = %session.id());
        tracing::info!(parent: &span, "Session allocated");

        Ok(PipelineRun {
            pipeline: self,
            guard: SessionGuard::new(session),
            stage: PipelineStage::Created,
            intake: Intake::new(self.limits),
            span,
        })
    }
}

/// One request's pass through the pipeline.
///
/// Dropping a run before [`finish`](Self::finish) (e.g. because the request
/// was cancelled) still removes the session directory.
pub struct PipelineRun<'p, W> {
    pipeline: &'p Pipeline<W>,
    guard: SessionGuard,
    stage: PipelineStage,
    intake: Intake,
    span: Span,
}

impl<W> fmt::Debug for PipelineRun<'_, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineRun")
            .field("session", self.guard.session())
            .field("stage", &self.stage)
            .finish()
    }
}

impl<'p, W: Worker> PipelineRun<'p, W> {
    pub fn session(&self) -> &Session {
        self.guard.session()
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Accept one multipart part into the session.
    ///
    /// Errors are returned as-is and do not end the run; pass the overall
    /// intake outcome to [`finish`](Self::finish).
    pub async fn receive_part<S, B, E>(
        &mut self,
        header: &PartHeader,
        body: S,
    ) -> Result<Option<UploadRole>, PipelineError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: fmt::Display,
    {
        if self.stage == PipelineStage::Created {
            advance(&self.span, &mut self.stage, PipelineStage::Intaking);
        }
        self.intake
            .receive(self.guard.session(), header, body)
            .instrument(self.span.clone())
            .await
    }

    /// Run the remaining stages.
    ///
    /// `intake` is the outcome of feeding parts; an error there fails the
    /// run without launching the worker. Exactly one terminal outcome is
    /// produced: a [`Delivery`], or the first error after the session has
    /// been destroyed.
    pub async fn finish(
        self,
        intake: Result<(), PipelineError>,
    ) -> Result<Delivery, PipelineError> {
        let PipelineRun {
            pipeline,
            guard,
            mut stage,
            intake: received,
            span,
        } = self;

        let outcome = async {
            intake?;
            if stage == PipelineStage::Created {
                advance(&span, &mut stage, PipelineStage::Intaking);
            }
            let uploads = received.finish()?;

            advance(&span, &mut stage, PipelineStage::Invoking);
            let session = guard.session();
            pipeline
                .worker
                .invoke(session, &uploads.document.path, &uploads.table.path)
                .await?;

            advance(&span, &mut stage, PipelineStage::Packaging);
            let summary = archive::pack_output(
                &session.output_dir(),
                &session.file_path(ARCHIVE_FILE_NAME),
            )
            .await?;
            let file = tokio::fs::File::open(&summary.path)
                .await
                .map_err(PackagingError::Io)?;

            advance(&span, &mut stage, PipelineStage::Delivering);
            Ok::<_, PipelineError>((summary, file))
        }
        .instrument(span.clone())
        .await;

        match outcome {
            Ok((summary, file)) => Ok(Delivery {
                file,
                summary,
                completion: DeliveryCompletion {
                    guard: Some(guard),
                    span,
                    transmitted: false,
                },
            }),
            Err(error) => {
                log_failure(&span, stage, &error);
                advance(&span, &mut stage, PipelineStage::Failed);
                guard.release().instrument(span).await;
                Err(error)
            }
        }
    }
}

fn advance(span: &Span, stage: &mut PipelineStage, next: PipelineStage) {
    debug_assert!(
        stage.can_transition_to(next),
        "illegal pipeline transition {stage:?} -> {next:?}"
    );
    tracing::info!(parent: span, from = ?*stage, to = ?next, "Pipeline stage changed");
    *stage = next;
}

fn log_failure(span: &Span, stage: PipelineStage, error: &PipelineError) {
    match error {
        PipelineError::Validation(e) => {
            tracing::warn!(parent: span, ?stage, error = %e, "Upload rejected");
        }
        other => {
            tracing::error!(parent: span, ?stage, error = %other, "Pipeline failed");
        }
    }
}

/// A packaged archive ready to be streamed to the client.
#[derive(Debug)]
pub struct Delivery {
    file: tokio::fs::File,
    summary: ArchiveSummary,
    completion: DeliveryCompletion,
}

impl Delivery {
    /// Download file name presented to the client.
    pub fn file_name(&self) -> &'static str {
        ARCHIVE_FILE_NAME
    }

    pub fn size_bytes(&self) -> u64 {
        self.summary.size_bytes
    }

    pub fn summary(&self) -> &ArchiveSummary {
        &self.summary
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.completion.guard.as_ref().map(|g| g.session().id())
    }

    /// Split into the open archive and the handle that ends the session.
    pub fn into_parts(self) -> (tokio::fs::File, DeliveryCompletion) {
        (self.file, self.completion)
    }
}

/// Ends the `Delivering` stage when dropped.
///
/// Owned by the response body: dropping it, after the last byte was sent
/// or because the client disconnected, removes the session directory.
#[derive(Debug)]
pub struct DeliveryCompletion {
    guard: Option<SessionGuard>,
    span: Span,
    transmitted: bool,
}

impl DeliveryCompletion {
    /// Record that the whole archive was handed to the transport.
    pub fn mark_transmitted(&mut self) {
        self.transmitted = true;
    }
}

impl Drop for DeliveryCompletion {
    fn drop(&mut self) {
        if self.transmitted {
            tracing::info!(parent: &self.span, "Archive delivered");
        } else {
            tracing::warn!(parent: &self.span, "Archive delivery interrupted before completion");
        }
        tracing::info!(
            parent: &self.span,
            from = ?PipelineStage::Delivering,
            to = ?PipelineStage::Cleaned,
            "Pipeline stage changed",
        );
        // Dropping the guard removes the session directory.
        self.guard.take();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
