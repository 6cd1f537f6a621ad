// meridian_core/src/graph/manifold.rs

use crate::types::{pose_from_parts, pose_rotation, pose_translation, Pose};
use nalgebra::{UnitQuaternion, Vector3, Vector6};

/// The product manifold R^3 x S^3 that a 7-element pose lives on.
///
/// The optimizer sees 6 degrees of freedom per pose: three for translation
/// (plain addition) and three for rotation (a rotation vector applied on the
/// left of the current quaternion). The quaternion therefore stays unit-norm
/// no matter how large a step the solver takes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoseManifold;

impl PoseManifold {
    pub const AMBIENT_DIM: usize = 7;
    pub const TANGENT_DIM: usize = 6;

    /// `x ⊞ delta`, with `delta = [dt_x, dt_y, dt_z, dtheta_x, dtheta_y, dtheta_z]`.
    pub fn plus(pose: &Pose, delta: &Vector6<f64>) -> Pose {
        let dt = Vector3::new(delta[0], delta[1], delta[2]);
        let dtheta = Vector3::new(delta[3], delta[4], delta[5]);

        let t = pose_translation(pose) + dt;
        let mut q = UnitQuaternion::from_scaled_axis(dtheta) * pose_rotation(pose);
        q.renormalize();

        pose_from_parts(&t, &q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::pose_identity;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_plus_zero_is_identity() {
        let pose = pose_identity();
        let next = PoseManifold::plus(&pose, &Vector6::zeros());
        for i in 0..7 {
            assert_abs_diff_eq!(next[i], pose[i], epsilon = 1e-15);
        }
    }

    #[test]
    fn test_plus_keeps_unit_quaternion() {
        let pose = pose_identity();
        let delta = Vector6::new(1.0, 2.0, 3.0, 3.0, -2.0, 5.0);
        let next = PoseManifold::plus(&pose, &delta);

        assert_abs_diff_eq!(next[0], 1.0);
        assert_abs_diff_eq!(next[2], 3.0);
        let q_norm = (next[3].powi(2) + next[4].powi(2) + next[5].powi(2) + next[6].powi(2)).sqrt();
        assert_abs_diff_eq!(q_norm, 1.0, epsilon = 1e-12);
    }
}
