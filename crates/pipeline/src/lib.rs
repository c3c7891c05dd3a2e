//! Per-request orchestration of the plan-marking pipeline.
//!
//! A [`Pipeline`] is shared by all requests; each request drives its own
//! [`PipelineRun`] through `Created → Intaking → Invoking → Packaging →
//! Delivering → Cleaned`, or into `Failed` from any non-terminal stage.

pub mod orchestrator;
pub mod stage;

pub use orchestrator::{Delivery, DeliveryCompletion, Pipeline, PipelineRun};
pub use stage::PipelineStage;
