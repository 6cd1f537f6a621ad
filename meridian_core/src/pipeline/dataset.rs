// meridian_core/src/pipeline/dataset.rs

use crate::error::DatasetError;
use crate::models::imu::ImuSample;
use crate::types::{PointCloud, Pose};
use std::fmt::Debug;
use std::path::{Path, PathBuf};

// --- DATASET TRAIT ---
/// Everything the frame processor reads from or writes to storage.
pub trait Dataset: Debug + Send {
    fn load_map_cloud(&self, path: &Path) -> Result<PointCloud, DatasetError>;

    /// Scan files in processing order.
    fn list_scan_files(&self, dir: &Path) -> Result<Vec<PathBuf>, DatasetError>;

    fn load_scan_cloud(&self, path: &Path) -> Result<PointCloud, DatasetError>;

    /// The inertial record belonging to a scan, or `None` when this dataset
    /// has no inertial source or no record for that scan.
    fn load_imu_sample(&self, scan: &Path) -> Result<Option<ImuSample>, DatasetError>;

    /// Writes one `x,y,z,qx,qy,qz,qw` row per pose.
    fn write_trajectory_csv(&self, poses: &[Pose]) -> Result<(), DatasetError>;
}
