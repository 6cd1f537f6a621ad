// meridian_app/src/registration/icp.rs

use super::preprocess::Preprocessor;
use super::voxel_map::VoxelMap;
use super::{PreprocessConfig, RegistrationConfig};
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use meridian_core::pipeline::{LocalMap, Registration, RegistrationResult};
use meridian_core::types::PointCloud;
use nalgebra::{Isometry3, Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use std::fmt;
use tracing::{debug, trace};

type MapTree = ImmutableKdTree<f64, u32, 3, 32>;

/// A KD-tree over a snapshot of the local map, tagged with the map revision
/// it was built from.
struct TreeCache {
    revision: u64,
    tree: MapTree,
    points: Vec<[f64; 3]>,
}

/// Point pairs matched in one ICP iteration.
struct Correspondences {
    source: Vec<Point3<f64>>,
    target: Vec<Point3<f64>>,
    sum_sq_dist: f64,
}

impl Correspondences {
    fn len(&self) -> usize {
        self.source.len()
    }

    fn rmse(&self) -> f64 {
        if self.source.is_empty() {
            return f64::INFINITY;
        }
        (self.sum_sq_dist / self.source.len() as f64).sqrt()
    }
}

/// Point-to-point ICP against a [`VoxelMap`].
///
/// The same type serves both registration roles; the constructors differ
/// only in how the internal map is kept. Scan-to-map holds the prior map
/// verbatim, scan-to-scan crops and downsamples every folded frame and forgets
/// voxels outside its removal horizon.
pub struct IcpRegistration {
    name: &'static str,
    config: RegistrationConfig,
    preprocessor: Preprocessor,
    map: VoxelMap,
    cache: Option<TreeCache>,
}

impl fmt::Debug for IcpRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IcpRegistration")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("map_points", &self.map.len())
            .field("cached_revision", &self.cache.as_ref().map(|c| c.revision))
            .finish()
    }
}

impl IcpRegistration {
    pub fn scan_to_map(config: &RegistrationConfig, preprocess: PreprocessConfig) -> Self {
        let map = VoxelMap::new(
            config.voxel_resolution,
            config.scan2map_max_points_per_cell,
            None,
        );
        Self::with_map("scan2map", config, preprocess, map)
    }

    pub fn scan_to_scan(config: &RegistrationConfig, preprocess: PreprocessConfig) -> Self {
        let map = VoxelMap::new(
            config.voxel_resolution,
            config.scan2scan_max_points_per_cell,
            Some(config.scan2scan_removal_horizon),
        )
        .with_preprocessor(Preprocessor::new(preprocess.clone()));
        Self::with_map("scan2scan", config, preprocess, map)
    }

    fn with_map(
        name: &'static str,
        config: &RegistrationConfig,
        preprocess: PreprocessConfig,
        map: VoxelMap,
    ) -> Self {
        Self {
            name,
            config: config.clone(),
            preprocessor: Preprocessor::new(preprocess),
            map,
            cache: None,
        }
    }

    pub fn map(&self) -> &VoxelMap {
        &self.map
    }

    /// Rebuilds the KD-tree if the map changed since the last query.
    fn refresh_tree(&mut self) {
        let revision = self.map.revision();
        if self.cache.as_ref().is_some_and(|c| c.revision == revision) {
            return;
        }
        let points: Vec<[f64; 3]> = self.map.points().iter().map(|p| [p.x, p.y, p.z]).collect();
        trace!("[{}] Rebuilding KD-tree over {} points", self.name, points.len());
        let tree = MapTree::new_from_slice(&points);
        self.cache = Some(TreeCache {
            revision,
            tree,
            points,
        });
    }

    fn find_correspondences(
        cache: &TreeCache,
        source: &[Point3<f64>],
        transform: &Isometry3<f64>,
        max_dist_sq: f64,
    ) -> Correspondences {
        let mut out = Correspondences {
            source: Vec::with_capacity(source.len()),
            target: Vec::with_capacity(source.len()),
            sum_sq_dist: 0.0,
        };
        for p in source {
            let q = transform * p;
            let nn = cache.tree.nearest_one::<kiddo::SquaredEuclidean>(&[q.x, q.y, q.z]);
            if nn.distance <= max_dist_sq {
                let [x, y, z] = cache.points[nn.item as usize];
                out.source.push(q);
                out.target.push(Point3::new(x, y, z));
                out.sum_sq_dist += nn.distance;
            }
        }
        out
    }
}

/// Least-squares rigid transform taking `source` onto `target` (Kabsch).
///
/// Returns `None` when the cross-covariance cannot be decomposed.
pub fn fit_transformation(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
) -> Option<Isometry3<f64>> {
    if source.len() != target.len() || source.len() < 3 {
        return None;
    }
    let n = source.len() as f64;
    let src_centroid = source.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n;
    let dst_centroid = target.iter().map(|p| p.coords).sum::<Vector3<f64>>() / n;

    let mut h = Matrix3::zeros();
    for (s, d) in source.iter().zip(target) {
        h += (s.coords - src_centroid) * (d.coords - dst_centroid).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v = svd.v_t?.transpose();
    let mut r = v * u.transpose();
    // Reflection: flip the axis of the smallest singular value.
    if r.determinant() < 0.0 {
        r = v * Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, -1.0)) * u.transpose();
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    let translation = dst_centroid - rotation * src_centroid;
    Some(Isometry3::from_parts(Translation3::from(translation), rotation))
}

impl Registration for IcpRegistration {
    fn initialize(&mut self, cloud: &PointCloud, pose: &Isometry3<f64>) -> bool {
        self.map.clear();
        self.cache = None;
        self.map.fold_in(cloud, pose);
        debug!(
            "[{}] Initialized with {} points in {} voxels",
            self.name,
            self.map.len(),
            self.map.num_voxels()
        );
        !self.map.is_empty()
    }

    fn register_frame(&mut self, frame: &PointCloud, seed: &Isometry3<f64>) -> RegistrationResult {
        let source = self.preprocessor.apply(frame);
        if source.is_empty() || self.map.is_empty() {
            return RegistrationResult {
                transform: *seed,
                num_inliers: 0,
            };
        }
        self.refresh_tree();
        let Some(cache) = self.cache.as_ref() else {
            return RegistrationResult {
                transform: *seed,
                num_inliers: 0,
            };
        };

        let max_dist = self.config.max_correspondence_distance;
        let max_dist_sq = max_dist * max_dist;
        let mut transform = *seed;
        let mut previous_rmse = f64::INFINITY;

        for iteration in 0..self.config.max_iterations {
            let matches = Self::find_correspondences(cache, &source.points, &transform, max_dist_sq);
            let inliers = matches.len();
            if inliers < self.config.min_correspondences.max(3) {
                debug!(
                    "[{}] Only {} correspondences at iteration {}, stopping",
                    self.name, inliers, iteration
                );
                break;
            }
            let Some(delta) = fit_transformation(&matches.source, &matches.target) else {
                break;
            };
            transform = delta * transform;

            let rmse = matches.rmse();
            trace!("[{}] iter {} rmse {:.6} inliers {}", self.name, iteration, rmse, inliers);
            if (previous_rmse - rmse).abs() < self.config.tolerance {
                break;
            }
            previous_rmse = rmse;
        }

        // Report the support of the final estimate.
        let support = Self::find_correspondences(cache, &source.points, &transform, max_dist_sq);

        RegistrationResult {
            transform,
            num_inliers: support.len(),
        }
    }

    fn local_map(&mut self) -> &mut dyn LocalMap {
        &mut self.map
    }
}
