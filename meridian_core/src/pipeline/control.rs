// meridian_core/src/pipeline/control.rs

//! Run control shared between the processing thread and whoever drives it.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    /// Terminal. Once stopped, a run never resumes.
    Stopped,
}

#[derive(Debug)]
struct ControlInner {
    state: Mutex<RunState>,
    changed: Condvar,
}

/// Pause/resume/stop signal, cloned into every thread that needs it.
///
/// The processing side only looks at it between frames through
/// [`wait_while_paused`](Self::wait_while_paused), so a frame in flight always
/// completes.
#[derive(Debug, Clone)]
pub struct RunControl {
    inner: Arc<ControlInner>,
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RunControl {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ControlInner {
                state: Mutex::new(RunState::Running),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn state(&self) -> RunState {
        *self.inner.state.lock()
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == RunState::Stopped
    }

    pub fn pause(&self) {
        self.transition(|s| (s == RunState::Running).then_some(RunState::Paused));
    }

    pub fn resume(&self) {
        self.transition(|s| (s == RunState::Paused).then_some(RunState::Running));
    }

    /// Flips between running and paused. Returns the new state.
    pub fn toggle_pause(&self) -> RunState {
        self.transition(|s| match s {
            RunState::Running => Some(RunState::Paused),
            RunState::Paused => Some(RunState::Running),
            RunState::Stopped => None,
        })
    }

    /// Requests termination and wakes every waiter. Idempotent.
    pub fn request_stop(&self) {
        self.transition(|s| (s != RunState::Stopped).then_some(RunState::Stopped));
    }

    /// Blocks while paused. Returns `Running` or `Stopped`, never `Paused`.
    pub fn wait_while_paused(&self) -> RunState {
        let mut state = self.inner.state.lock();
        while *state == RunState::Paused {
            self.inner.changed.wait(&mut state);
        }
        *state
    }

    fn transition(&self, next: impl FnOnce(RunState) -> Option<RunState>) -> RunState {
        let mut state = self.inner.state.lock();
        if let Some(new_state) = next(*state) {
            *state = new_state;
            self.inner.changed.notify_all();
        }
        *state
    }
}

/// Lock-free progress counters, written by the processing thread and read by
/// the control loop.
#[derive(Debug, Default)]
pub struct Progress {
    total_frames: AtomicUsize,
    frames_processed: AtomicUsize,
    stationary_frames: AtomicUsize,
    skipped_frames: AtomicUsize,
    last_frame_micros: AtomicU64,
}

/// A plain copy of [`Progress`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total_frames: usize,
    pub frames_processed: usize,
    pub stationary_frames: usize,
    pub skipped_frames: usize,
    pub last_frame: Duration,
}

impl Progress {
    pub fn set_total(&self, total: usize) {
        self.total_frames.store(total, Ordering::Relaxed);
    }

    pub fn record_frame(&self, elapsed: Duration, stationary: bool) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
        if stationary {
            self.stationary_frames.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.last_frame_micros.store(micros, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.skipped_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            frames_processed: self.frames_processed.load(Ordering::Relaxed),
            stationary_frames: self.stationary_frames.load(Ordering::Relaxed),
            skipped_frames: self.skipped_frames.load(Ordering::Relaxed),
            last_frame: Duration::from_micros(self.last_frame_micros.load(Ordering::Relaxed)),
        }
    }
}
