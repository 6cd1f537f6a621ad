// meridian_core/src/pipeline/registration.rs

use crate::types::PointCloud;
use nalgebra::{Isometry3, Point3};
use std::fmt::Debug;

/// Result of aligning one frame.
#[derive(Debug, Clone, Copy)]
pub struct RegistrationResult {
    /// World-frame pose of the sensor at the frame.
    pub transform: Isometry3<f64>,
    /// Correspondences that survived the final iteration. Used as a
    /// confidence measure for scan-to-map anchors.
    pub num_inliers: usize,
}

// --- LOCAL MAP TRAIT ---
/// A world-frame accumulation of registered frames.
pub trait LocalMap: Debug + Send {
    /// Inserts `frame` (in the sensor frame) after moving it to `pose`.
    fn fold_in(&mut self, frame: &PointCloud, pose: &Isometry3<f64>);

    /// Copies the current map contents out.
    fn points(&self) -> Vec<Point3<f64>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// --- REGISTRATION TRAIT ---
/// A scan registration service (scan-to-scan or scan-to-map).
///
/// The algorithm behind it is opaque to the frame processor, which only ever
/// seeds it, reads back a pose with an inlier count and refreshes its map.
pub trait Registration: Debug + Send {
    /// Resets the internal map to `cloud` placed at `pose`. Returns `false`
    /// when the service cannot work with the given cloud.
    fn initialize(&mut self, cloud: &PointCloud, pose: &Isometry3<f64>) -> bool;

    /// Aligns `frame` (sensor frame) against the internal map, starting at `seed`.
    fn register_frame(&mut self, frame: &PointCloud, seed: &Isometry3<f64>) -> RegistrationResult;

    fn local_map(&mut self) -> &mut dyn LocalMap;
}
