// meridian_core/src/config.rs

//! Configuration consumed by the backend. These structs deserialize straight
//! from the `[solver]` and `[pipeline]` tables of a run configuration file;
//! the application layer is responsible for locating and merging that file.

use serde::Deserialize;

// =========================================================================
// == Solver / Sliding Window ==
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SolverConfig {
    /// Iteration cap for a single `optimize()` call.
    pub max_iterations: usize,
    /// Worker threads used to evaluate residual blocks.
    pub num_threads: usize,
    /// Log per-iteration minimizer progress.
    pub verbose: bool,
    /// Freeze poses older than `sliding_window_size` and drop their constraints.
    pub use_sliding_window: bool,
    /// Number of most recent poses kept free in the optimization.
    pub sliding_window_size: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            num_threads: 4,
            verbose: false,
            use_sliding_window: true,
            sliding_window_size: 100,
        }
    }
}

// =========================================================================
// == Frame Processing ==
// =========================================================================

/// What the frame processor does when the dataset hands it an empty scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyFramePolicy {
    /// Terminate the whole run.
    #[default]
    Abort,
    /// Log the frame and move on without producing an output row for it.
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    /// Below this translation (meters) a frame may be treated as stationary.
    pub translation_threshold: f64,
    /// Below this rotation angle (radians) a frame may be treated as stationary.
    pub rotation_threshold: f64,
    /// Scan-to-map results need strictly more inliers than this to become an
    /// absolute constraint.
    pub absolute_inlier_threshold: usize,
    pub empty_frame_policy: EmptyFramePolicy,
    /// Capacity of the bounded snapshot queue handed to visual consumers.
    pub snapshot_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            translation_threshold: 0.1,
            rotation_threshold: 0.01,
            absolute_inlier_threshold: 50,
            empty_frame_policy: EmptyFramePolicy::Abort,
            snapshot_queue_capacity: 8,
        }
    }
}
