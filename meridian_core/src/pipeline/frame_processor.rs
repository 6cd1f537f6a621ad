// meridian_core/src/pipeline/frame_processor.rs

use crate::config::{EmptyFramePolicy, PipelineConfig, SolverConfig};
use crate::error::PipelineError;
use crate::graph::{EdgeKind, PoseGraph};
use crate::messages::{FrameKind, FrameSnapshot};
use crate::models::motion::{ConstantDisplacement, MotionPredictor};
use crate::pipeline::control::Progress;
use crate::pipeline::dataset::Dataset;
use crate::pipeline::registration::Registration;
use crate::types::{isometry_to_pose, pose_to_isometry, Displacement, PointCloud, Pose};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use nalgebra::Isometry3;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What happened to one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Constraints were added and the window optimized.
    Optimized {
        scan_index: usize,
        inliers: usize,
        absolute: bool,
    },
    /// The motion gate held; no constraints were added.
    Stationary { scan_index: usize },
    /// Empty scan dropped under [`EmptyFramePolicy::Skip`].
    Skipped { scan_index: usize },
}

/// Drives registration, the motion gate, constraint creation and window
/// optimization for one scan at a time.
///
/// The processor owns the pose arena. Index `cur` is the pose being estimated;
/// it always holds the motion-model prediction until the frame that refines
/// it has been optimized. The output trajectory gets exactly one row per
/// processed scan, in input order.
#[derive(Debug)]
pub struct FrameProcessor {
    config: PipelineConfig,
    dataset: Box<dyn Dataset>,
    scan2map: Box<dyn Registration>,
    scan2scan: Box<dyn Registration>,
    predictor: Box<dyn MotionPredictor>,
    graph: PoseGraph,

    poses: Vec<Pose>,
    output: Vec<Pose>,
    scan_files: Vec<PathBuf>,
    next_scan: usize,
    cur: usize,
    initialized: bool,

    snapshots: Option<Sender<FrameSnapshot>>,
    progress: Arc<Progress>,
}

impl FrameProcessor {
    pub fn new(
        config: PipelineConfig,
        solver: SolverConfig,
        dataset: Box<dyn Dataset>,
        scan2map: Box<dyn Registration>,
        scan2scan: Box<dyn Registration>,
    ) -> Self {
        Self::with_graph(config, PoseGraph::new(solver), dataset, scan2map, scan2scan)
    }

    /// Same as [`new`](Self::new) with a pre-built graph, e.g. one using a
    /// custom [`LeastSquaresSolver`](crate::graph::LeastSquaresSolver).
    pub fn with_graph(
        config: PipelineConfig,
        graph: PoseGraph,
        dataset: Box<dyn Dataset>,
        scan2map: Box<dyn Registration>,
        scan2scan: Box<dyn Registration>,
    ) -> Self {
        Self {
            config,
            dataset,
            scan2map,
            scan2scan,
            predictor: Box::new(ConstantDisplacement),
            graph,
            poses: Vec::new(),
            output: Vec::new(),
            scan_files: Vec::new(),
            next_scan: 0,
            cur: 0,
            initialized: false,
            snapshots: None,
            progress: Arc::new(Progress::default()),
        }
    }

    /// Opens a bounded snapshot queue. Frames published while the queue is
    /// full are dropped for the consumer, never waited on.
    pub fn subscribe(&mut self) -> Receiver<FrameSnapshot> {
        let (tx, rx) = crossbeam_channel::bounded(self.config.snapshot_queue_capacity.max(1));
        self.snapshots = Some(tx);
        rx
    }

    // =========================================================================
    // == Bootstrap ==
    // =========================================================================

    /// Loads the map, registers the first scan against it, and seeds the
    /// second pose from scan-to-scan registration.
    ///
    /// On error nothing has been written and the processor must not be used.
    pub fn initialize(
        &mut self,
        map_path: &Path,
        scans_dir: &Path,
        initial_pose: &Isometry3<f64>,
    ) -> Result<(), PipelineError> {
        let map = self
            .dataset
            .load_map_cloud(map_path)
            .map_err(PipelineError::MapLoad)?;
        info!(points = map.len(), path = ?map_path, "Loaded map cloud");
        if !self.scan2map.initialize(&map, &Isometry3::identity()) {
            return Err(PipelineError::RegistrationInit(
                "scan-to-map service rejected the map cloud",
            ));
        }

        let scan_files = self.dataset.list_scan_files(scans_dir)?;
        match scan_files.len() {
            0 => return Err(PipelineError::NoScans(scans_dir.to_path_buf())),
            1 => return Err(PipelineError::NotEnoughScans { found: 1 }),
            n => info!(scans = n, dir = ?scans_dir, "Found scan files"),
        }

        let first = self.load_scan(&scan_files, 0)?;
        if first.is_empty() {
            return Err(PipelineError::RegistrationInit("first scan is empty"));
        }
        let anchor = self.scan2map.register_frame(&first, initial_pose);
        let pose0 = isometry_to_pose(&anchor.transform);
        self.poses.push(pose0);
        self.graph
            .add_constraint(&self.poses, 0, 0, &pose0, EdgeKind::Absolute)?;
        self.output.push(pose0);
        debug!(inliers = anchor.num_inliers, "Anchored first scan to map");

        if !self.scan2scan.initialize(&first, &anchor.transform) {
            return Err(PipelineError::RegistrationInit(
                "scan-to-scan service rejected the first scan",
            ));
        }

        let second = self.load_scan(&scan_files, 1)?;
        let seed = self.scan2scan.register_frame(&second, &anchor.transform);
        self.poses.push(isometry_to_pose(&seed.transform));

        self.cur = 1;
        // The second scan is refined again by the first loop step.
        self.next_scan = 1;
        self.progress.set_total(scan_files.len());
        self.scan_files = scan_files;
        self.initialized = true;
        info!("Frame processor initialized");
        Ok(())
    }

    // =========================================================================
    // == Per-Frame Step ==
    // =========================================================================

    /// Processes the next scan. Returns `Ok(None)` once every scan has been consumed.
    pub fn process_next(&mut self) -> Result<Option<FrameOutcome>, PipelineError> {
        if !self.initialized {
            return Err(PipelineError::NotInitialized);
        }
        if self.next_scan >= self.scan_files.len() {
            return Ok(None);
        }
        let scan_index = self.next_scan;
        self.next_scan += 1;
        let started = Instant::now();

        let frame = self.load_scan(&self.scan_files, scan_index)?;
        if frame.is_empty() {
            match self.config.empty_frame_policy {
                EmptyFramePolicy::Abort => return Err(PipelineError::EmptyFrame { frame: scan_index }),
                EmptyFramePolicy::Skip => {
                    warn!(scan_index, "Skipping empty frame");
                    self.progress.record_skip();
                    return Ok(Some(FrameOutcome::Skipped { scan_index }));
                }
            }
        }

        let cur = self.cur;
        let seed = pose_to_isometry(&self.poses[cur]);
        let previous = pose_to_isometry(&self.poses[cur - 1]);

        let s2s = self.scan2scan.register_frame(&frame, &seed);

        // --- Motion gate ---
        let motion = Displacement::between(&previous, &s2s.transform);
        if motion.is_below(self.config.translation_threshold, self.config.rotation_threshold) {
            debug!(
                scan_index,
                translation = motion.translation,
                rotation = motion.rotation,
                "Stationary frame"
            );
            self.output.push(isometry_to_pose(&s2s.transform));
            self.publish(scan_index, FrameKind::Stationary);
            self.progress.record_frame(started.elapsed(), true);
            return Ok(Some(FrameOutcome::Stationary { scan_index }));
        }

        let s2m = self.scan2map.register_frame(&frame, &seed);

        // --- Constraints ---
        let delta = isometry_to_pose(&(previous.inverse() * s2s.transform));
        self.graph
            .add_constraint(&self.poses, cur - 1, cur, &delta, EdgeKind::Relative)?;

        let absolute = s2m.num_inliers > self.config.absolute_inlier_threshold;
        if absolute {
            let measurement = isometry_to_pose(&s2m.transform);
            self.graph
                .add_constraint(&self.poses, cur, cur, &measurement, EdgeKind::Absolute)?;
        } else {
            debug!(scan_index, inliers = s2m.num_inliers, "Too few map inliers for an absolute constraint");
        }

        if let Some(sample) = self.dataset.load_imu_sample(&self.scan_files[scan_index])? {
            self.graph.add_imu_constraint(&self.poses, cur, &sample);
        }

        // --- Optimize ---
        let summary = self.graph.optimize(&mut self.poses);
        if !summary.is_usable() {
            return Err(PipelineError::SolverFailure {
                frame: scan_index,
                report: summary.brief_report(),
            });
        }

        let optimized = pose_to_isometry(&self.poses[cur]);
        self.scan2scan.local_map().fold_in(&frame, &optimized);

        let next = self.predictor.predict(&self.poses[cur], &self.poses[cur - 1]);
        self.poses.push(next);
        self.cur += 1;
        self.output.push(self.poses[self.cur - 1]);

        debug!(
            scan_index,
            inliers = s2m.num_inliers,
            absolute,
            fixed = ?self.graph.fixed_index(),
            "Optimized frame"
        );
        self.publish(scan_index, FrameKind::Optimized);
        self.progress.record_frame(started.elapsed(), false);

        Ok(Some(FrameOutcome::Optimized {
            scan_index,
            inliers: s2m.num_inliers,
            absolute,
        }))
    }

    /// Writes the output trajectory. Safe to call on any exit path after a
    /// successful [`initialize`](Self::initialize).
    pub fn finish(&mut self) -> Result<(), PipelineError> {
        if !self.initialized {
            return Err(PipelineError::NotInitialized);
        }
        self.dataset.write_trajectory_csv(&self.output)?;
        info!(rows = self.output.len(), "Wrote trajectory");
        Ok(())
    }

    // --- Accessors ---

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    pub fn trajectory(&self) -> &[Pose] {
        &self.output
    }

    pub fn graph(&self) -> &PoseGraph {
        &self.graph
    }

    pub fn total_scans(&self) -> usize {
        self.scan_files.len()
    }

    /// True while scans remain to be processed.
    pub fn has_remaining(&self) -> bool {
        self.initialized && self.next_scan < self.scan_files.len()
    }

    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    // --- Internals ---

    fn load_scan(&self, files: &[PathBuf], index: usize) -> Result<PointCloud, PipelineError> {
        self.dataset
            .load_scan_cloud(&files[index])
            .map_err(|source| PipelineError::ScanLoad {
                frame: index,
                source,
            })
    }

    fn publish(&mut self, scan_index: usize, kind: FrameKind) {
        let Some(tx) = &self.snapshots else {
            return;
        };
        let snapshot = FrameSnapshot {
            scan_index,
            kind,
            pose: self.output[self.output.len() - 1],
            local_map: self.scan2scan.local_map().points(),
            trajectory_len: self.output.len(),
        };
        match tx.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!(scan_index, "Snapshot queue full, dropping"),
            Err(TrySendError::Disconnected(_)) => {
                debug!("Snapshot consumer went away");
                self.snapshots = None;
            }
        }
    }
}
