//! Per-frame coordination and the worker thread that drives it.
//!
//! One cycle moves a frame through
//! `Idle -> FrameAcquired -> Converted -> Detected -> Released`; failures
//! jump straight to `Released`. The worker runs cycles one at a time in
//! response to source signals.

mod coordinator;
mod error;
mod stats;
mod worker;

pub use coordinator::{CycleOutcome, CycleReport, CycleState, PipelineCoordinator};
pub use error::PipelineError;
pub use stats::{PipelineStats, SharedStats};
pub use worker::{PipelineHandle, PipelineOptions, PipelineWorker};
