// meridian_core/src/pipeline/testing.rs

//! In-memory collaborators for exercising the pipeline without files or ICP.

use crate::error::DatasetError;
use crate::models::imu::ImuSample;
use crate::pipeline::dataset::Dataset;
use crate::pipeline::registration::{LocalMap, Registration, RegistrationResult};
use crate::types::{PointCloud, Pose};
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub fn cloud(n: usize) -> PointCloud {
    (0..n).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect()
}

pub fn translation(x: f64) -> Isometry3<f64> {
    Isometry3::from_parts(Translation3::new(x, 0.0, 0.0), UnitQuaternion::identity())
}

#[derive(Debug, Default)]
pub struct VecLocalMap {
    points: Vec<Point3<f64>>,
}

impl LocalMap for VecLocalMap {
    fn fold_in(&mut self, frame: &PointCloud, pose: &Isometry3<f64>) {
        self.points.extend(frame.points.iter().map(|p| pose * p));
    }

    fn points(&self) -> Vec<Point3<f64>> {
        self.points.clone()
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}

/// Replays a fixed list of results, then echoes the seed back.
///
/// A `None` entry makes that call panic.
#[derive(Debug, Default)]
pub struct ScriptedRegistration {
    script: VecDeque<Option<RegistrationResult>>,
    map: VecLocalMap,
}

impl ScriptedRegistration {
    pub fn then(mut self, transform: Isometry3<f64>, num_inliers: usize) -> Self {
        self.script.push_back(Some(RegistrationResult {
            transform,
            num_inliers,
        }));
        self
    }

    pub fn then_panic(mut self) -> Self {
        self.script.push_back(None);
        self
    }
}

impl Registration for ScriptedRegistration {
    fn initialize(&mut self, cloud: &PointCloud, pose: &Isometry3<f64>) -> bool {
        self.map = VecLocalMap::default();
        self.map.fold_in(cloud, pose);
        true
    }

    fn register_frame(&mut self, _frame: &PointCloud, seed: &Isometry3<f64>) -> RegistrationResult {
        match self.script.pop_front() {
            Some(Some(result)) => result,
            Some(None) => panic!("registration failed"),
            None => RegistrationResult {
                transform: *seed,
                num_inliers: 0,
            },
        }
    }

    fn local_map(&mut self) -> &mut dyn LocalMap {
        &mut self.map
    }
}

#[derive(Debug)]
pub struct MemoryDataset {
    map: Option<PointCloud>,
    scans: Vec<PointCloud>,
    imu: HashMap<PathBuf, ImuSample>,
    written: Arc<Mutex<Vec<Pose>>>,
}

impl MemoryDataset {
    pub fn new(scans: Vec<PointCloud>) -> Self {
        Self {
            map: Some(cloud(100)),
            scans,
            imu: HashMap::new(),
            written: Arc::default(),
        }
    }

    pub fn without_map(mut self) -> Self {
        self.map = None;
        self
    }

    pub fn with_imu(mut self, scan: usize, roll: f64, pitch: f64) -> Self {
        let sample = ImuSample {
            roll,
            pitch,
            ..Default::default()
        };
        self.imu.insert(scan_path(scan), sample);
        self
    }

    /// Handle on whatever `write_trajectory_csv` receives.
    pub fn written(&self) -> Arc<Mutex<Vec<Pose>>> {
        Arc::clone(&self.written)
    }
}

fn scan_path(index: usize) -> PathBuf {
    PathBuf::from(format!("scan_{index:03}.bin"))
}

impl Dataset for MemoryDataset {
    fn load_map_cloud(&self, path: &Path) -> Result<PointCloud, DatasetError> {
        self.map.clone().ok_or_else(|| DatasetError::Format {
            path: path.to_path_buf(),
            reason: "no map in memory".to_string(),
        })
    }

    fn list_scan_files(&self, _dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
        Ok((0..self.scans.len()).map(scan_path).collect())
    }

    fn load_scan_cloud(&self, path: &Path) -> Result<PointCloud, DatasetError> {
        (0..self.scans.len())
            .find(|&i| scan_path(i) == path)
            .map(|i| self.scans[i].clone())
            .ok_or_else(|| DatasetError::Format {
                path: path.to_path_buf(),
                reason: "unknown scan".to_string(),
            })
    }

    fn load_imu_sample(&self, scan: &Path) -> Result<Option<ImuSample>, DatasetError> {
        Ok(self.imu.get(scan).cloned())
    }

    fn write_trajectory_csv(&self, poses: &[Pose]) -> Result<(), DatasetError> {
        *self.written.lock() = poses.to_vec();
        Ok(())
    }
}
