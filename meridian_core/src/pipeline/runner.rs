// meridian_core/src/pipeline/runner.rs

use crate::error::PipelineError;
use crate::pipeline::control::{Progress, RunControl, RunState};
use crate::pipeline::frame_processor::FrameProcessor;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// How a background run ended.
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Scans handled by the loop (optimized, stationary or skipped).
    pub frames: usize,
    /// Rows in the output trajectory, bootstrap row included.
    pub trajectory_len: usize,
    /// A stop request arrived while scans remained.
    pub stopped_early: bool,
    /// The first error that ended the loop or the final write.
    pub error: Option<PipelineError>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs a [`FrameProcessor`] on its own named thread.
///
/// The processor is moved into the thread, so the pose arena is never shared.
/// Control goes through the [`RunControl`] passed in, which is only consulted
/// between frames. Dropping the runner requests a stop and joins the thread.
#[derive(Debug)]
pub struct PipelineRunner {
    control: RunControl,
    progress: Arc<Progress>,
    handle: Option<JoinHandle<RunOutcome>>,
}

impl PipelineRunner {
    pub fn spawn(processor: FrameProcessor, control: RunControl) -> std::io::Result<Self> {
        let progress = processor.progress();
        let thread_control = control.clone();
        let handle = thread::Builder::new()
            .name("meridian-pipeline".to_string())
            .spawn(move || run_loop(processor, thread_control))?;

        Ok(Self {
            control,
            progress,
            handle: Some(handle),
        })
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    /// True once the processing thread has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Waits for the processing thread. Does not request a stop by itself.
    pub fn join(mut self) -> RunOutcome {
        self.join_inner().unwrap_or_default()
    }

    fn join_inner(&mut self) -> Option<RunOutcome> {
        let handle = self.handle.take()?;
        Some(handle.join().unwrap_or_else(|payload| {
            let message = panic_message(payload.as_ref());
            error!("Processing thread panicked: {message}");
            RunOutcome {
                error: Some(PipelineError::WorkerPanicked(message)),
                ..Default::default()
            }
        }))
    }
}

impl Drop for PipelineRunner {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.control.request_stop();
            self.join_inner();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Steps the processor until it runs out of scans, fails or is stopped.
///
/// A panic inside a step ends the loop like an error does, so the rows
/// produced so far are still written.
fn run_loop(mut processor: FrameProcessor, control: RunControl) -> RunOutcome {
    let mut outcome = RunOutcome::default();
    info!(scans = processor.total_scans(), "Processing started");

    loop {
        if control.wait_while_paused() == RunState::Stopped {
            outcome.stopped_early = processor.has_remaining();
            info!("Stop requested");
            break;
        }
        let step = panic::catch_unwind(AssertUnwindSafe(|| processor.process_next()));
        match step {
            Ok(Ok(Some(_))) => outcome.frames += 1,
            Ok(Ok(None)) => break,
            Ok(Err(e)) => {
                error!("Processing aborted: {e}");
                outcome.error = Some(e);
                break;
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Frame step panicked: {message}");
                outcome.error = Some(PipelineError::WorkerPanicked(message));
                break;
            }
        }
    }

    if let Err(e) = processor.finish() {
        error!("Failed to write trajectory: {e}");
        outcome.error.get_or_insert(e);
    }
    outcome.trajectory_len = processor.trajectory().len();

    // Lets anyone waiting on the control know the run is over.
    control.request_stop();
    info!(
        frames = outcome.frames,
        rows = outcome.trajectory_len,
        stopped_early = outcome.stopped_early,
        "Processing finished"
    );
    outcome
}
