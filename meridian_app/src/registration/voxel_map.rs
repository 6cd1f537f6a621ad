// meridian_app/src/registration/voxel_map.rs

use super::preprocess::{voxel_key, Preprocessor};
use meridian_core::pipeline::LocalMap;
use meridian_core::types::PointCloud;
use nalgebra::{Isometry3, Point3};
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Voxel {
    points: Vec<Point3<f64>>,
    /// Insertion counter value when this voxel last received a point.
    last_update: usize,
}

/// A hashed voxel grid of world-frame points.
///
/// Each voxel holds at most `max_points_per_cell` points. With a removal
/// horizon, voxels not touched by the last `horizon` insertions are evicted,
/// which keeps a scan-to-scan map local to the recent trajectory.
#[derive(Debug, Clone)]
pub struct VoxelMap {
    resolution: f64,
    max_points_per_cell: usize,
    removal_horizon: Option<usize>,
    preprocessor: Option<Preprocessor>,
    voxels: HashMap<[i64; 3], Voxel>,
    insertions: usize,
    len: usize,
    revision: u64,
}

impl VoxelMap {
    pub fn new(resolution: f64, max_points_per_cell: usize, removal_horizon: Option<usize>) -> Self {
        Self {
            resolution,
            max_points_per_cell: max_points_per_cell.max(1),
            removal_horizon,
            preprocessor: None,
            voxels: HashMap::new(),
            insertions: 0,
            len: 0,
            revision: 0,
        }
    }

    /// Filters every frame through `preprocessor` before it is folded in.
    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    pub fn clear(&mut self) {
        self.voxels.clear();
        self.len = 0;
        self.insertions = 0;
        self.revision += 1;
    }

    /// Changes whenever the contents change. Lets callers cache derived
    /// structures such as a KD-tree.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn num_voxels(&self) -> usize {
        self.voxels.len()
    }

    /// Adds world-frame points without any preprocessing.
    pub fn insert_world_points(&mut self, points: impl IntoIterator<Item = Point3<f64>>) {
        self.insertions += 1;
        for p in points {
            let voxel = self
                .voxels
                .entry(voxel_key(&p, self.resolution))
                .or_insert_with(|| Voxel {
                    points: Vec::new(),
                    last_update: 0,
                });
            if voxel.points.len() < self.max_points_per_cell {
                voxel.points.push(p);
                voxel.last_update = self.insertions;
                self.len += 1;
            }
        }
        self.evict_stale();
        self.revision += 1;
    }

    fn evict_stale(&mut self) {
        let Some(horizon) = self.removal_horizon else {
            return;
        };
        let now = self.insertions;
        let mut removed = 0;
        self.voxels.retain(|_, v| {
            let keep = now - v.last_update < horizon;
            if !keep {
                removed += v.points.len();
            }
            keep
        });
        self.len -= removed;
    }
}

impl LocalMap for VoxelMap {
    fn fold_in(&mut self, frame: &PointCloud, pose: &Isometry3<f64>) {
        let filtered;
        let frame = match &self.preprocessor {
            Some(pre) => {
                filtered = pre.apply(frame);
                &filtered
            }
            None => frame,
        };
        let world: Vec<Point3<f64>> = frame.points.iter().map(|p| pose * p).collect();
        self.insert_world_points(world);
    }

    fn points(&self) -> Vec<Point3<f64>> {
        self.voxels
            .values()
            .flat_map(|v| v.points.iter().copied())
            .collect()
    }

    fn len(&self) -> usize {
        self.len
    }
}
