// meridian_core/src/models/motion.rs

use crate::types::{pose_from_parts, pose_rotation, pose_translation, Pose};
use std::fmt::Debug;

// --- MOTION PREDICTOR TRAIT ---
/// Extrapolates where the sensor will be at the next frame, given the two most
/// recent poses. The result only seeds registration, so it needs to be close,
/// not exact.
pub trait MotionPredictor: Debug + Send + Sync {
    /// Predicts the pose following `current`, where `previous` precedes it.
    fn predict(&self, current: &Pose, previous: &Pose) -> Pose;
}

/// Zero-order hold on velocity in pose space: whatever displacement took
/// `previous` to `current` is applied once more on top of `current`.
///
/// Frames are indexed, not timestamped, so this assumes a steady frame rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstantDisplacement;

impl ConstantDisplacement {
    pub fn extrapolate(current: &Pose, previous: &Pose) -> Pose {
        let t_cur = pose_translation(current);
        let t_prev = pose_translation(previous);
        let q_cur = pose_rotation(current);
        let q_prev = pose_rotation(previous);

        // Translation step in the world frame, rotation step in the body frame.
        let t_next = t_cur + (t_cur - t_prev);
        let q_step = q_prev.inverse() * q_cur;
        let mut q_next = q_cur * q_step;
        q_next.renormalize();

        pose_from_parts(&t_next, &q_next)
    }
}

impl MotionPredictor for ConstantDisplacement {
    fn predict(&self, current: &Pose, previous: &Pose) -> Pose {
        Self::extrapolate(current, previous)
    }
}
