// meridian_app/src/simulation/mod.rs

//! Synthetic dataset generation: a prior map, KITTI-style scans along a
//! known trajectory, matching OXTS records, and the ground truth.

pub mod scene;
pub mod writer;

pub use scene::SceneConfig;
pub use writer::DatasetLayout;

use crate::registration::preprocess::voxel_downsample;
use meridian_core::error::DatasetError;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Normal, NormalError};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Invalid noise model: {0}")]
    Noise(#[from] NormalError),

    #[error("Cannot generate a dataset with {0} frames")]
    TooFewFrames(usize),

    #[error(transparent)]
    Dataset(#[from] DatasetError),
}

/// What [`generate`] wrote.
#[derive(Debug, Clone)]
pub struct SynthSummary {
    pub layout: DatasetLayout,
    pub frames: usize,
    pub map_points: usize,
}

/// Writes a complete dataset for `frames` scans under `out`.
///
/// The same `seed` always produces byte-identical output.
pub fn generate(
    out: &Path,
    frames: usize,
    seed: u64,
    config: &SceneConfig,
) -> Result<SynthSummary, SimulationError> {
    if frames < 2 {
        return Err(SimulationError::TooFewFrames(frames));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0, config.noise_stddev)?;
    let roughness = Normal::new(0.0, config.roughness)?;

    let layout = DatasetLayout::new(out);
    layout.create_dirs()?;

    let poses = scene::trajectory(config, frames);
    let length = (frames - 1) as f64 * config.step;
    let margin = config.sensor_range + 5.0;
    let world = scene::build_world(config, -margin, length + margin, &roughness, &mut rng);
    info!(
        "Generating {} frames over {:.1} m ({} world points, seed {})",
        frames,
        length,
        world.len(),
        seed
    );

    // The map is the world surface at a coarser sampling than the scans.
    let map = voxel_downsample(&world, config.spacing * 2.0);
    writer::write_map(&layout, &map)?;

    for (i, pose) in poses.iter().enumerate() {
        let cloud = scene::scan(&world, pose, config, &noise, &mut rng);
        debug!("Frame {}: {} points", i, cloud.len());
        writer::write_frame(&layout, i, &cloud, pose)?;
    }
    writer::write_ground_truth(&layout, &poses)?;

    info!("Synthetic dataset written to {:?}", layout.root);
    Ok(SynthSummary {
        layout,
        frames,
        map_points: map.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{pcd, trajectory};

    #[test]
    fn test_generate_writes_every_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let summary = generate(dir.path(), 3, 1, &SceneConfig::default()).unwrap();
        let layout = &summary.layout;

        assert!(summary.map_points > 0);
        assert_eq!(pcd::read_pcd(&layout.map()).unwrap().len(), summary.map_points);
        for i in 0..3 {
            assert!(layout.scan_file(i).is_file());
            assert!(layout.imu_file(i).is_file());
        }
        assert_eq!(trajectory::read_trajectory(&layout.ground_truth()).unwrap().len(), 3);
    }

    #[test]
    fn test_same_seed_same_scans() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let config = SceneConfig::default();
        generate(a.path(), 2, 9, &config).unwrap();
        generate(b.path(), 2, 9, &config).unwrap();

        let la = DatasetLayout::new(a.path());
        let lb = DatasetLayout::new(b.path());
        assert_eq!(
            std::fs::read(la.scan_file(1)).unwrap(),
            std::fs::read(lb.scan_file(1)).unwrap()
        );
    }

    #[test]
    fn test_single_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            generate(dir.path(), 1, 0, &SceneConfig::default()),
            Err(SimulationError::TooFewFrames(1))
        ));
    }
}
