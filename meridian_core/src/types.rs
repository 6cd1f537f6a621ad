// meridian_core/src/types.rs

use nalgebra::{Isometry3, Point3, Quaternion, SVector, Translation3, UnitQuaternion, Vector3};

// --- Core Type Aliases ---

/// A rigid transform stored as `[x, y, z, qx, qy, qz, qw]`.
///
/// This is the element type of the pose arena and of the exported trajectory.
/// The quaternion is kept unit-norm by every operation in this crate.
pub type Pose = SVector<f64, 7>;

/// Builds a [`Pose`] from its translation and rotation parts.
pub fn pose_from_parts(translation: &Vector3<f64>, rotation: &UnitQuaternion<f64>) -> Pose {
    let q = rotation.coords; // nalgebra stores [i, j, k, w]
    Pose::from_column_slice(&[
        translation.x,
        translation.y,
        translation.z,
        q.x,
        q.y,
        q.z,
        q.w,
    ])
}

/// The identity pose (zero translation, identity rotation).
pub fn pose_identity() -> Pose {
    pose_from_parts(&Vector3::zeros(), &UnitQuaternion::identity())
}

/// Extracts the translation part of a pose.
pub fn pose_translation(pose: &Pose) -> Vector3<f64> {
    Vector3::new(pose[0], pose[1], pose[2])
}

/// Extracts the rotation part of a pose, normalizing it on the way out.
pub fn pose_rotation(pose: &Pose) -> UnitQuaternion<f64> {
    // Quaternion::new takes (w, i, j, k)
    UnitQuaternion::from_quaternion(Quaternion::new(pose[6], pose[3], pose[4], pose[5]))
}

pub fn pose_to_isometry(pose: &Pose) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::from(pose_translation(pose)),
        pose_rotation(pose),
    )
}

pub fn isometry_to_pose(iso: &Isometry3<f64>) -> Pose {
    pose_from_parts(&iso.translation.vector, &iso.rotation)
}

/// The magnitude of the motion between two poses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Displacement {
    /// Euclidean distance between the two positions, in meters.
    pub translation: f64,
    /// Angle of the relative rotation, in radians (always in `[0, pi]`).
    pub rotation: f64,
}

impl Displacement {
    /// Computes the displacement that takes `from` to `to`.
    pub fn between(from: &Isometry3<f64>, to: &Isometry3<f64>) -> Self {
        let delta = from.inverse() * to;
        Self {
            translation: delta.translation.vector.norm(),
            rotation: delta.rotation.angle(),
        }
    }

    /// True when both components stay under their thresholds.
    pub fn is_below(&self, translation_threshold: f64, rotation_threshold: f64) -> bool {
        self.translation < translation_threshold && self.rotation < rotation_threshold
    }
}

// =========================================================================
// == Point Clouds ==
// =========================================================================

/// An unordered set of 3D points, expressed in the frame of whoever produced it.
///
/// Frames are owned transiently by the frame processor; the only long-lived
/// copy of their geometry is whatever a registration service folds into its map.
#[derive(Clone, Debug, Default)]
pub struct PointCloud {
    pub points: Vec<Point3<f64>>,
}

impl PointCloud {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns a copy of this cloud with every point mapped through `transform`.
    pub fn transformed(&self, transform: &Isometry3<f64>) -> PointCloud {
        PointCloud {
            points: self.points.iter().map(|p| transform * p).collect(),
        }
    }
}

impl FromIterator<Point3<f64>> for PointCloud {
    fn from_iter<I: IntoIterator<Item = Point3<f64>>>(iter: I) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}
