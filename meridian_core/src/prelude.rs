// meridian_core/src/prelude.rs

// --- Core Abstractions (the contracts collaborators implement) ---
pub use crate::graph::LeastSquaresSolver;
pub use crate::models::motion::MotionPredictor;
pub use crate::pipeline::{Dataset, LocalMap, Registration, RegistrationResult};

// --- Core Data Structures ---
pub use crate::messages::{FrameKind, FrameSnapshot};
pub use crate::models::imu::ImuSample;
pub use crate::types::{
    isometry_to_pose, pose_from_parts, pose_identity, pose_to_isometry, Displacement, PointCloud,
    Pose,
};

// --- Configuration and Errors ---
pub use crate::config::{EmptyFramePolicy, PipelineConfig, SolverConfig};
pub use crate::error::{DatasetError, GraphError, ImuError, PipelineError};

// --- Backend ---
pub use crate::graph::{ConstraintKind, EdgeKind, PoseGraph, SolverSummary};
pub use crate::models::motion::ConstantDisplacement;
pub use crate::pipeline::{
    FrameOutcome, FrameProcessor, PipelineRunner, Progress, RunControl, RunOutcome, RunState,
};
