// meridian_app/src/simulation/writer.rs

use crate::io::{kitti, pcd, trajectory};
use meridian_core::error::DatasetError;
use meridian_core::models::imu::INVALID_STATUS;
use meridian_core::types::{isometry_to_pose, PointCloud, Pose};
use nalgebra::Isometry3;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// File locations inside a generated dataset directory.
#[derive(Debug, Clone)]
pub struct DatasetLayout {
    pub root: PathBuf,
}

impl DatasetLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn map(&self) -> PathBuf {
        self.root.join("map.pcd")
    }

    pub fn scans(&self) -> PathBuf {
        self.root.join("scans")
    }

    pub fn imu(&self) -> PathBuf {
        self.root.join("oxts")
    }

    pub fn ground_truth(&self) -> PathBuf {
        self.root.join("ground_truth.csv")
    }

    pub fn scan_file(&self, index: usize) -> PathBuf {
        self.scans().join(format!("{index:06}.bin"))
    }

    pub fn imu_file(&self, index: usize) -> PathBuf {
        self.imu().join(format!("{index:06}.txt"))
    }

    pub fn create_dirs(&self) -> Result<(), DatasetError> {
        for dir in [self.root.clone(), self.scans(), self.imu()] {
            std::fs::create_dir_all(&dir).map_err(|source| DatasetError::Io { path: dir, source })?;
        }
        Ok(())
    }
}

/// One OXTS line for a sensor at `pose`. Only the orientation is
/// meaningful; position, rates and accuracies are zero and the mode fields
/// carry the invalid marker.
pub fn oxts_record(pose: &Isometry3<f64>) -> String {
    let (roll, pitch, yaw) = pose.rotation.euler_angles();
    let mut line = String::new();
    let _ = write!(line, "0 0 0 {roll:.9} {pitch:.9} {yaw:.9}");
    // velocities (5), accelerations (6), angular rates (6), accuracies (2)
    for _ in 0..19 {
        line.push_str(" 0");
    }
    for _ in 0..5 {
        let _ = write!(line, " {INVALID_STATUS}");
    }
    line
}

pub fn write_map(layout: &DatasetLayout, map: &PointCloud) -> Result<(), DatasetError> {
    pcd::write_pcd(&layout.map(), map)
}

pub fn write_frame(
    layout: &DatasetLayout,
    index: usize,
    scan: &PointCloud,
    pose: &Isometry3<f64>,
) -> Result<(), DatasetError> {
    kitti::write_kitti_bin(&layout.scan_file(index), scan)?;
    let path = layout.imu_file(index);
    std::fs::write(&path, oxts_record(pose) + "\n")
        .map_err(|source| DatasetError::Io { path, source })
}

pub fn write_ground_truth(layout: &DatasetLayout, poses: &[Isometry3<f64>]) -> Result<(), DatasetError> {
    let poses: Vec<Pose> = poses.iter().map(isometry_to_pose).collect();
    trajectory::write_trajectory(&layout.ground_truth(), &poses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use meridian_core::models::imu::ImuSample;
    use nalgebra::{Translation3, UnitQuaternion};

    #[test]
    fn test_oxts_record_parses_back() {
        let pose = Isometry3::from_parts(
            Translation3::new(3.0, 1.0, 1.7),
            UnitQuaternion::from_euler_angles(0.01, -0.02, 0.4),
        );
        let record = oxts_record(&pose);
        assert_eq!(record.split_whitespace().count(), 30);

        let sample = ImuSample::from_record(&record).unwrap();
        assert_abs_diff_eq!(sample.roll, 0.01, epsilon = 1e-9);
        assert_abs_diff_eq!(sample.pitch, -0.02, epsilon = 1e-9);
        assert_abs_diff_eq!(sample.yaw, 0.4, epsilon = 1e-9);
        assert_eq!(sample.numsats, INVALID_STATUS);
    }

    #[test]
    fn test_layout_names() {
        let layout = DatasetLayout::new("/data/run");
        assert_eq!(layout.scan_file(7), PathBuf::from("/data/run/scans/000007.bin"));
        assert_eq!(layout.imu_file(7), PathBuf::from("/data/run/oxts/000007.txt"));
        assert_eq!(layout.map(), Path::new("/data/run/map.pcd"));
    }
}
