// meridian_core/src/graph/factors.rs

//! Cost functions connecting poses to measurements.
//!
//! Every factor produces a 6-vector residual: three translation components
//! followed by three rotation components taken as twice the vector part of
//! a quaternion error (the small-angle approximation of a rotation vector).

use crate::models::imu::ImuSample;
use crate::types::{pose_rotation, pose_translation, Pose};
use dyn_clone::DynClone;
use nalgebra::{UnitQuaternion, Vector3, Vector6};
use std::fmt::Debug;

pub type Residual = Vector6<f64>;

// --- COST FUNCTION TRAIT ---
/// A residual term over one or more poses of the arena.
///
/// `evaluate` receives the poses in the same order as the parameter indices
/// the block was registered with.
pub trait CostFunction: DynClone + Debug + Send + Sync {
    /// Number of poses this term reads.
    fn parameter_count(&self) -> usize;

    fn evaluate(&self, poses: &[&Pose]) -> Residual;
}

dyn_clone::clone_trait_object!(CostFunction);

/// `2 * vec(q)`, flipping to the shorter arc first so that `q` and `-q`
/// give the same residual.
fn rotation_error(q: &UnitQuaternion<f64>) -> Vector3<f64> {
    let v = q.imag();
    if q.w < 0.0 {
        -2.0 * v
    } else {
        2.0 * v
    }
}

fn stack(translation: Vector3<f64>, rotation: Vector3<f64>) -> Residual {
    Residual::new(
        translation.x,
        translation.y,
        translation.z,
        rotation.x,
        rotation.y,
        rotation.z,
    )
}

// =========================================================================
// == Absolute Pose ==
// =========================================================================

/// Anchors a single pose to a measured pose in the world frame, typically
/// the result of scan-to-map registration.
#[derive(Debug, Clone)]
pub struct AbsolutePoseFactor {
    translation: Vector3<f64>,
    rotation: UnitQuaternion<f64>,
}

impl AbsolutePoseFactor {
    pub fn new(measurement: &Pose) -> Self {
        Self {
            translation: pose_translation(measurement),
            rotation: pose_rotation(measurement),
        }
    }
}

impl CostFunction for AbsolutePoseFactor {
    fn parameter_count(&self) -> usize {
        1
    }

    fn evaluate(&self, poses: &[&Pose]) -> Residual {
        let pose = poses[0];
        let dp = pose_translation(pose) - self.translation;
        let dq = self.rotation.inverse() * pose_rotation(pose);
        stack(dp, rotation_error(&dq))
    }
}

// =========================================================================
// == Relative Pose ==
// =========================================================================

/// Constrains the transform between two poses, expressed in the frame of the
/// first one: `T_from^-1 * T_to`.
#[derive(Debug, Clone)]
pub struct RelativePoseFactor {
    translation: Vector3<f64>,
    rotation: UnitQuaternion<f64>,
}

impl RelativePoseFactor {
    pub fn new(delta: &Pose) -> Self {
        Self {
            translation: pose_translation(delta),
            rotation: pose_rotation(delta),
        }
    }
}

impl CostFunction for RelativePoseFactor {
    fn parameter_count(&self) -> usize {
        2
    }

    fn evaluate(&self, poses: &[&Pose]) -> Residual {
        let (from, to) = (poses[0], poses[1]);
        let q_from_inv = pose_rotation(from).inverse();

        let p_est = q_from_inv * (pose_translation(to) - pose_translation(from));
        let q_est = q_from_inv * pose_rotation(to);

        let dp = p_est - self.translation;
        let dq = self.rotation.inverse() * q_est;
        stack(dp, rotation_error(&dq))
    }
}

// =========================================================================
// == IMU Orientation ==
// =========================================================================

/// Pulls a pose's roll and pitch towards the inertial attitude.
///
/// Heading from the IMU is not trusted: the reference orientation is
/// rebuilt with the yaw of the pose under evaluation, so the residual only
/// sees tilt. Translation is unconstrained and its residual entries stay zero.
#[derive(Debug, Clone)]
pub struct ImuOrientationFactor {
    roll: f64,
    pitch: f64,
}

impl ImuOrientationFactor {
    pub fn new(sample: &ImuSample) -> Self {
        Self {
            roll: sample.roll,
            pitch: sample.pitch,
        }
    }
}

impl CostFunction for ImuOrientationFactor {
    fn parameter_count(&self) -> usize {
        1
    }

    fn evaluate(&self, poses: &[&Pose]) -> Residual {
        let q_pose = pose_rotation(poses[0]);
        let (_, _, yaw) = q_pose.euler_angles();

        // from_euler_angles composes as Rz(yaw) * Ry(pitch) * Rx(roll)
        let q_imu = UnitQuaternion::from_euler_angles(self.roll, self.pitch, yaw);
        let dq = q_pose * q_imu.inverse();
        stack(Vector3::zeros(), rotation_error(&dq))
    }
}
