// meridian_app/src/io/dataset.rs

use super::{kitti, pcd, trajectory};
use meridian_core::error::DatasetError;
use meridian_core::models::imu::ImuSample;
use meridian_core::pipeline::Dataset;
use meridian_core::types::{PointCloud, Pose};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// The on-disk dataset layout:
///
/// - a map as `.pcd` (or a single KITTI `.bin`),
/// - a flat directory of KITTI `.bin` scans, processed in file-name order,
/// - optionally a directory of OXTS `.txt` records named like the scans.
#[derive(Debug, Clone)]
pub struct FileDataset {
    output: PathBuf,
    imu_dir: Option<PathBuf>,
}

impl FileDataset {
    pub fn new(output: impl Into<PathBuf>) -> Self {
        Self {
            output: output.into(),
            imu_dir: None,
        }
    }

    pub fn with_imu_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.imu_dir = dir;
        self
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map_or(false, |e| e.eq_ignore_ascii_case(ext))
}

impl Dataset for FileDataset {
    fn load_map_cloud(&self, path: &Path) -> Result<PointCloud, DatasetError> {
        info!("Loading map from: {:?}", path);
        if has_extension(path, "pcd") {
            pcd::read_pcd(path)
        } else if has_extension(path, "bin") {
            kitti::read_kitti_bin(path)
        } else {
            Err(DatasetError::Format {
                path: path.to_path_buf(),
                reason: "expected a .pcd or .bin map".into(),
            })
        }
    }

    fn list_scan_files(&self, dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
        let mut scans = Vec::new();
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| DatasetError::Io {
                path: dir.to_path_buf(),
                source: e.into(),
            })?;
            if entry.file_type().is_file() && has_extension(entry.path(), "bin") {
                scans.push(entry.into_path());
            }
        }
        debug!("Found {} scans in {:?}", scans.len(), dir);
        Ok(scans)
    }

    fn load_scan_cloud(&self, path: &Path) -> Result<PointCloud, DatasetError> {
        kitti::read_kitti_bin(path)
    }

    fn load_imu_sample(&self, scan: &Path) -> Result<Option<ImuSample>, DatasetError> {
        let (Some(dir), Some(stem)) = (&self.imu_dir, scan.file_stem()) else {
            return Ok(None);
        };
        let mut name = stem.to_os_string();
        name.push(".txt");
        let record = dir.join(name);
        if !record.is_file() {
            debug!("No IMU record for {:?}", scan);
            return Ok(None);
        }
        Ok(Some(ImuSample::from_file(&record)?))
    }

    fn write_trajectory_csv(&self, poses: &[Pose]) -> Result<(), DatasetError> {
        if let Some(parent) = self.output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| DatasetError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        trajectory::write_trajectory(&self.output, poses)?;
        info!("Wrote {} poses to {:?}", poses.len(), self.output);
        Ok(())
    }
}
