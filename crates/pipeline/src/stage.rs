//! Pipeline stages and their legal transitions.

use serde::Serialize;

/// Lifecycle stage of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Session allocated, nothing received yet.
    Created,
    /// Receiving and materializing uploads.
    Intaking,
    /// Worker running.
    Invoking,
    /// Worker succeeded; building the archive.
    Packaging,
    /// Archive is being streamed to the client.
    Delivering,
    /// Response finished (or the client went away) and the session is gone.
    Cleaned,
    /// A stage failed; the session is torn down before the error is returned.
    Failed,
}

impl PipelineStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cleaned | Self::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        match (self, next) {
            (Created, Intaking)
            | (Intaking, Invoking)
            | (Invoking, Packaging)
            | (Packaging, Delivering)
            | (Delivering, Cleaned) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
