// meridian_app/src/simulation/scene.rs

//! A static street-like world and a sensor driving through it.

use meridian_core::types::PointCloud;
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Geometry and sensor parameters of the synthetic world.
#[derive(Debug, Clone)]
pub struct SceneConfig {
    /// Distance travelled between consecutive scans, meters.
    pub step: f64,
    /// Half-width of the street; walls stand at `+-half_width`.
    pub half_width: f64,
    pub wall_height: f64,
    /// Height of the sensor above the floor.
    pub sensor_height: f64,
    /// Spacing of the sampled surface points.
    pub spacing: f64,
    pub pillar_every: f64,
    pub sensor_range: f64,
    /// Probability that a visible point returns in a given scan.
    pub return_ratio: f64,
    /// Standard deviation of the per-axis range noise, meters.
    pub noise_stddev: f64,
    /// Standard deviation of the surface roughness baked into the world.
    pub roughness: f64,
    /// Amplitude of the lateral weave of the trajectory, meters.
    pub weave: f64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            step: 0.5,
            half_width: 8.0,
            wall_height: 4.0,
            sensor_height: 1.7,
            spacing: 0.25,
            pillar_every: 6.0,
            sensor_range: 25.0,
            return_ratio: 0.6,
            noise_stddev: 0.01,
            roughness: 0.003,
            weave: 1.0,
        }
    }
}

/// Ground-truth sensor poses, one per scan.
///
/// The sensor drives along +x and weaves sideways on a slow sine, with the
/// heading following the path tangent.
pub fn trajectory(config: &SceneConfig, frames: usize) -> Vec<Isometry3<f64>> {
    let wavelength = 40.0;
    let k = std::f64::consts::TAU / wavelength;
    (0..frames)
        .map(|i| {
            let x = i as f64 * config.step;
            let y = config.weave * (k * x).sin();
            let heading = (config.weave * k * (k * x).cos()).atan();
            Isometry3::from_parts(
                Translation3::new(x, y, config.sensor_height),
                UnitQuaternion::from_euler_angles(0.0, 0.0, heading),
            )
        })
        .collect()
}

/// Samples the world surfaces (floor, two walls, square pillars) covering
/// `[x_min, x_max]` along the street. Every point is displaced along each axis
/// by a draw from `roughness`.
pub fn build_world(
    config: &SceneConfig,
    x_min: f64,
    x_max: f64,
    roughness: &Normal<f64>,
    rng: &mut ChaCha8Rng,
) -> PointCloud {
    let s = config.spacing;
    let steps = |from: f64, to: f64| {
        let n = ((to - from) / s).floor().max(0.0) as usize;
        (0..=n).map(move |i| from + i as f64 * s)
    };

    let mut points = Vec::new();
    for x in steps(x_min, x_max) {
        for y in steps(-config.half_width, config.half_width) {
            points.push(Point3::new(x, y, 0.0));
        }
        for z in steps(0.0, config.wall_height) {
            points.push(Point3::new(x, -config.half_width, z));
            points.push(Point3::new(x, config.half_width, z));
        }
    }

    // Pillars break the symmetry along the street.
    let pillar = 0.6;
    let mut px = x_min + config.pillar_every / 2.0;
    let mut side = 1.0;
    while px <= x_max {
        let cy = side * (config.half_width - 2.0);
        for z in steps(0.0, config.wall_height) {
            for t in steps(-pillar, pillar) {
                points.push(Point3::new(px + t, cy - pillar, z));
                points.push(Point3::new(px + t, cy + pillar, z));
                points.push(Point3::new(px - pillar, cy + t, z));
                points.push(Point3::new(px + pillar, cy + t, z));
            }
        }
        px += config.pillar_every;
        side = -side;
    }
    points
        .into_iter()
        .map(|p| {
            Point3::new(
                p.x + roughness.sample(rng),
                p.y + roughness.sample(rng),
                p.z + roughness.sample(rng),
            )
        })
        .collect()
}

/// Simulates one scan: the world points within range of `pose`, thinned at
/// random, perturbed with Gaussian noise, expressed in the sensor frame.
pub fn scan(
    world: &PointCloud,
    pose: &Isometry3<f64>,
    config: &SceneConfig,
    noise: &Normal<f64>,
    rng: &mut ChaCha8Rng,
) -> PointCloud {
    let inverse = pose.inverse();
    let range2 = config.sensor_range * config.sensor_range;
    world
        .points
        .iter()
        .filter(|p| (p.coords - pose.translation.vector).norm_squared() <= range2)
        .filter_map(|p| {
            if !rng.gen_bool(config.return_ratio) {
                return None;
            }
            let local = inverse * p;
            Some(Point3::new(
                local.x + noise.sample(rng),
                local.y + noise.sample(rng),
                local.z + noise.sample(rng),
            ))
        })
        .collect()
}
