// meridian_core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while ingesting inertial records.
#[derive(Debug, Error)]
pub enum ImuError {
    #[error("Cannot open IMU file {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read IMU file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed IMU field '{field}': could not parse '{token}'")]
    Parse { field: &'static str, token: String },
}

/// Errors raised by the pose graph when a caller hands it inconsistent indices.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("Pose index {index} is out of range for a trajectory of {len} poses")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Pose index {index} is frozen behind the sliding window (fixed index {fixed})")]
    FrozenIndex { index: usize, fixed: usize },
}

/// Errors raised by a [`Dataset`](crate::pipeline::Dataset) implementation.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported or malformed file {path:?}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("Failed to write trajectory to {path:?}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error(transparent)]
    Imu(#[from] ImuError),
}

/// Everything that can end a run early.
///
/// Initialization failures (`MapLoad`, `NoScans`, `NotEnoughScans`,
/// `RegistrationInit`) happen before the processing loop and leave no output
/// behind. The remaining variants terminate the loop; the trajectory that has
/// accumulated up to that point is still flushed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to load map cloud: {0}")]
    MapLoad(#[source] DatasetError),

    #[error("Failed to load scan {frame}: {source}")]
    ScanLoad {
        frame: usize,
        #[source]
        source: DatasetError,
    },

    #[error("No scan files found in {0:?}")]
    NoScans(PathBuf),

    #[error("At least two scans are needed to bootstrap, found {found}")]
    NotEnoughScans { found: usize },

    #[error("Registration bootstrap failed: {0}")]
    RegistrationInit(&'static str),

    #[error("Solver returned an unusable solution at frame {frame}: {report}")]
    SolverFailure { frame: usize, report: String },

    #[error("Received an empty frame at scan {frame}")]
    EmptyFrame { frame: usize },

    #[error("Frame processor used before a successful initialize()")]
    NotInitialized,

    #[error("Processing thread panicked: {0}")]
    WorkerPanicked(String),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}
