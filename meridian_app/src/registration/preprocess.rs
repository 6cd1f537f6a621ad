// meridian_app/src/registration/preprocess.rs

use super::PreprocessConfig;
use meridian_core::types::PointCloud;
use nalgebra::Point3;
use std::collections::HashSet;

/// Integer voxel coordinates of a point.
pub fn voxel_key(p: &Point3<f64>, resolution: f64) -> [i64; 3] {
    [
        (p.x / resolution).floor() as i64,
        (p.y / resolution).floor() as i64,
        (p.z / resolution).floor() as i64,
    ]
}

/// Keeps the first point that falls into each voxel.
pub fn voxel_downsample(cloud: &PointCloud, resolution: f64) -> PointCloud {
    if resolution <= 0.0 {
        return cloud.clone();
    }
    let mut seen = HashSet::with_capacity(cloud.len());
    cloud
        .points
        .iter()
        .filter(|p| seen.insert(voxel_key(p, resolution)))
        .copied()
        .collect()
}

/// Range crop followed by voxel downsampling, applied in the sensor frame.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn apply(&self, cloud: &PointCloud) -> PointCloud {
        let (min2, max2) = (
            self.config.min_range * self.config.min_range,
            self.config.max_range * self.config.max_range,
        );
        let cropped: PointCloud = cloud
            .points
            .iter()
            .filter(|p| {
                let r2 = p.coords.norm_squared();
                r2 >= min2 && r2 <= max2
            })
            .copied()
            .collect();
        voxel_downsample(&cropped, self.config.downsample_resolution)
    }
}
