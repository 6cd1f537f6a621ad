// meridian_core/src/pipeline/mod.rs

//! Frame-by-frame processing: collaborator contracts, the frame processor,
//! and the background runner with its pause/stop control.

pub mod control;
pub mod dataset;
pub mod frame_processor;
pub mod registration;
pub mod runner;

#[cfg(test)]
pub(crate) mod testing;

pub use control::{Progress, ProgressSnapshot, RunControl, RunState};
pub use dataset::Dataset;
pub use frame_processor::{FrameOutcome, FrameProcessor};
pub use registration::{LocalMap, Registration, RegistrationResult};
pub use runner::{PipelineRunner, RunOutcome};
