// meridian_app/src/registration/mod.rs

//! Concrete registration: point-to-point ICP against a voxelized local map.

pub mod icp;
pub mod preprocess;
pub mod voxel_map;

pub use icp::IcpRegistration;
pub use preprocess::Preprocessor;
pub use voxel_map::VoxelMap;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RegistrationConfig {
    /// ICP iteration cap per frame.
    pub max_iterations: usize,
    /// Stop once the RMSE changes by less than this between iterations.
    pub tolerance: f64,
    /// Correspondences farther apart than this (meters) are rejected; the
    /// survivors are the reported inliers.
    pub max_correspondence_distance: f64,
    /// Edge length of a local-map voxel, in meters.
    pub voxel_resolution: f64,
    /// Frames after which a scan-to-scan voxel is evicted.
    pub scan2scan_removal_horizon: usize,
    pub scan2scan_max_points_per_cell: usize,
    pub scan2map_max_points_per_cell: usize,
    /// Below this many correspondences the frame is not aligned at all.
    pub min_correspondences: usize,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            tolerance: 1e-6,
            max_correspondence_distance: 1.0,
            voxel_resolution: 0.5,
            scan2scan_removal_horizon: 100,
            scan2scan_max_points_per_cell: 20,
            scan2map_max_points_per_cell: 20,
            min_correspondences: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PreprocessConfig {
    /// Points closer than this to the sensor are dropped (vehicle returns).
    pub min_range: f64,
    pub max_range: f64,
    /// Voxel edge for downsampling; `0` keeps every point.
    pub downsample_resolution: f64,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            min_range: 1.0,
            max_range: 80.0,
            downsample_resolution: 0.5,
        }
    }
}
