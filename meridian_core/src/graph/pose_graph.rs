// meridian_core/src/graph/pose_graph.rs

use crate::config::SolverConfig;
use crate::error::GraphError;
use crate::graph::factors::{AbsolutePoseFactor, ImuOrientationFactor, RelativePoseFactor};
use crate::graph::loss::{CauchyLoss, TukeyLoss};
use crate::graph::problem::{Problem, ResidualBlockId};
use crate::graph::solver::{LeastSquaresSolver, LevenbergMarquardt, SolverOptions, SolverSummary};
use crate::models::imu::ImuSample;
use crate::types::Pose;
use tracing::{debug, info, warn};

const ABSOLUTE_LOSS_SCALE: f64 = 1.0;
const RELATIVE_LOSS_SCALE: f64 = 1.0;
const IMU_LOSS_SCALE: f64 = 1.0;

/// Measurement kinds a caller can add with [`PoseGraph::add_constraint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// `measurement` is a world-frame pose for `to`; `from` is ignored.
    Absolute,
    /// `measurement` is the delta `T_from^-1 * T_to`.
    Relative,
}

/// Every kind of constraint the graph keeps track of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    Absolute,
    Relative,
    ImuOrientation,
}

impl From<EdgeKind> for ConstraintKind {
    fn from(kind: EdgeKind) -> Self {
        match kind {
            EdgeKind::Absolute => ConstraintKind::Absolute,
            EdgeKind::Relative => ConstraintKind::Relative,
        }
    }
}

/// The live constraints targeting one pose index.
///
/// Each slot holds the solver handle of the block it owns. Clearing a slot is
/// always mirrored by removing that block from the problem.
#[derive(Debug, Clone, Copy, Default)]
struct ConstraintSlots {
    absolute: Option<ResidualBlockId>,
    /// Handle plus the `from` index of the relative edge.
    relative: Option<(ResidualBlockId, usize)>,
    imu: Option<ResidualBlockId>,
}

impl ConstraintSlots {
    fn get(&self, kind: ConstraintKind) -> Option<ResidualBlockId> {
        match kind {
            ConstraintKind::Absolute => self.absolute,
            ConstraintKind::Relative => self.relative.map(|(id, _)| id),
            ConstraintKind::ImuOrientation => self.imu,
        }
    }

    fn take(&mut self, kind: ConstraintKind) -> Option<ResidualBlockId> {
        match kind {
            ConstraintKind::Absolute => self.absolute.take(),
            ConstraintKind::Relative => self.relative.take().map(|(id, _)| id),
            ConstraintKind::ImuOrientation => self.imu.take(),
        }
    }

    fn is_empty(&self) -> bool {
        self.absolute.is_none() && self.relative.is_none() && self.imu.is_none()
    }
}

/// Sliding-window pose graph over a pose arena owned by the caller.
///
/// The graph never stores poses. Constraints are built from `&[Pose]` and
/// optimization writes the solution back into `&mut [Pose]`. Poses at or below
/// the fixed index are held constant, but only indices strictly below it are
/// closed to new constraints; once the window advances, every constraint
/// reaching behind the new boundary is retracted from the problem.
#[derive(Debug)]
pub struct PoseGraph {
    config: SolverConfig,
    options: SolverOptions,
    problem: Problem,
    solver: Box<dyn LeastSquaresSolver>,
    slots: Vec<ConstraintSlots>,
    fixed_index: Option<usize>,
    last_summary: Option<SolverSummary>,
}

impl PoseGraph {
    pub fn new(config: SolverConfig) -> Self {
        Self::with_solver(config, Box::new(LevenbergMarquardt::new()))
    }

    pub fn with_solver(mut config: SolverConfig, solver: Box<dyn LeastSquaresSolver>) -> Self {
        if config.use_sliding_window && config.sliding_window_size < 2 {
            warn!(
                "Sliding window of {} cannot hold a relative edge, using 2",
                config.sliding_window_size
            );
            config.sliding_window_size = 2;
        }
        let options = SolverOptions::from(&config);
        Self {
            config,
            options,
            problem: Problem::new(),
            solver,
            slots: Vec::new(),
            fixed_index: None,
            last_summary: None,
        }
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    // --- Building ---

    /// Adds an absolute or relative constraint ending at `to`.
    ///
    /// An existing constraint of the same kind at `to` is replaced. Window
    /// management runs afterwards with the current arena length.
    pub fn add_constraint(
        &mut self,
        poses: &[Pose],
        from: usize,
        to: usize,
        measurement: &Pose,
        kind: EdgeKind,
    ) -> Result<(), GraphError> {
        let referenced = match kind {
            EdgeKind::Absolute => vec![to],
            EdgeKind::Relative => vec![from, to],
        };
        for &index in &referenced {
            self.check_index(index, poses.len())?;
        }

        self.ensure_slot(to);
        self.retract(to, kind.into());

        let id = match kind {
            EdgeKind::Absolute => {
                let id = self.problem.add_residual_block(
                    Box::new(AbsolutePoseFactor::new(measurement)),
                    Box::new(TukeyLoss::new(ABSOLUTE_LOSS_SCALE)),
                    vec![to],
                );
                self.slots[to].absolute = Some(id);
                id
            }
            EdgeKind::Relative => {
                let id = self.problem.add_residual_block(
                    Box::new(RelativePoseFactor::new(measurement)),
                    Box::new(CauchyLoss::new(RELATIVE_LOSS_SCALE)),
                    vec![from, to],
                );
                self.slots[to].relative = Some((id, from));
                id
            }
        };
        for &index in &referenced {
            self.problem.set_manifold(index);
        }
        debug!(?kind, from, to, ?id, "Added constraint");

        self.manage_sliding_window(poses.len());
        Ok(())
    }

    /// Ties the roll and pitch of pose `index` to an inertial sample.
    ///
    /// Out-of-range and frozen indices are ignored. Window management runs
    /// afterwards, as for [`add_constraint`](Self::add_constraint).
    pub fn add_imu_constraint(&mut self, poses: &[Pose], index: usize, sample: &ImuSample) {
        if index >= poses.len() {
            debug!(index, len = poses.len(), "Ignoring IMU constraint beyond the arena");
            return;
        }
        if self.fixed_index.is_some_and(|fixed| index < fixed) {
            debug!(index, "Ignoring IMU constraint on a frozen pose");
            return;
        }

        self.ensure_slot(index);
        self.retract(index, ConstraintKind::ImuOrientation);

        let id = self.problem.add_residual_block(
            Box::new(ImuOrientationFactor::new(sample)),
            Box::new(CauchyLoss::new(IMU_LOSS_SCALE)),
            vec![index],
        );
        self.problem.set_manifold(index);
        self.slots[index].imu = Some(id);
        debug!(index, roll = sample.roll, pitch = sample.pitch, "Added IMU constraint");

        self.manage_sliding_window(poses.len());
    }

    /// Fixes index 0 on first use, then advances the fixed index to
    /// `len - window` once the arena outgrows the window.
    pub fn manage_sliding_window(&mut self, len: usize) {
        let fixed = match self.fixed_index {
            Some(fixed) => fixed,
            None => {
                self.problem.set_parameter_block_constant(0);
                self.fixed_index = Some(0);
                debug!("Fixed pose 0 as the gauge");
                0
            }
        };

        if !self.config.use_sliding_window || len <= self.config.sliding_window_size {
            return;
        }

        let boundary = len - self.config.sliding_window_size;
        if boundary <= fixed {
            return;
        }

        let retracted = self.retract_before(boundary);
        self.problem.set_parameter_block_constant(boundary);
        self.fixed_index = Some(boundary);
        debug!(boundary, retracted, "Advanced sliding window");
    }

    // --- Solving ---

    /// Runs the solver over the current window, writing poses in place.
    ///
    /// The returned summary says whether the result is usable; a solver that
    /// merely hit its iteration cap still counts as usable.
    pub fn optimize(&mut self, poses: &mut [Pose]) -> SolverSummary {
        let summary = self.solver.solve(&self.options, &self.problem, poses);
        if summary.is_usable() {
            debug!("{}", summary.brief_report());
        } else {
            warn!("{}", summary.brief_report());
        }
        if self.options.verbose {
            info!(fixed = ?self.fixed_index, "{}", summary.brief_report());
        }
        self.last_summary = Some(summary.clone());
        summary
    }

    // --- Introspection ---

    pub fn fixed_index(&self) -> Option<usize> {
        self.fixed_index
    }

    pub fn has_constraint(&self, kind: ConstraintKind, index: usize) -> bool {
        self.slots
            .get(index)
            .is_some_and(|slot| slot.get(kind).is_some())
    }

    pub fn num_constraints(&self, kind: ConstraintKind) -> usize {
        self.slots.iter().filter(|s| s.get(kind).is_some()).count()
    }

    /// Every pose index referenced by a live constraint, ascending, with duplicates.
    pub fn constraint_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .flat_map(|(to, slot)| {
                let mut refs = Vec::new();
                if slot.absolute.is_some() {
                    refs.push(to);
                }
                if let Some((_, from)) = slot.relative {
                    refs.push(from);
                    refs.push(to);
                }
                if slot.imu.is_some() {
                    refs.push(to);
                }
                refs
            })
            .collect();
        indices.sort_unstable();
        indices
    }

    pub fn problem(&self) -> &Problem {
        &self.problem
    }

    pub fn last_summary(&self) -> Option<&SolverSummary> {
        self.last_summary.as_ref()
    }

    // --- Internals ---

    /// The fixed index itself stays open: edges leaving the window boundary
    /// attach to it.
    fn check_index(&self, index: usize, len: usize) -> Result<(), GraphError> {
        if index >= len {
            return Err(GraphError::IndexOutOfRange { index, len });
        }
        if let Some(fixed) = self.fixed_index {
            if index < fixed {
                return Err(GraphError::FrozenIndex { index, fixed });
            }
        }
        Ok(())
    }

    fn ensure_slot(&mut self, index: usize) {
        if self.slots.len() <= index {
            self.slots.resize(index + 1, ConstraintSlots::default());
        }
    }

    fn retract(&mut self, index: usize, kind: ConstraintKind) -> bool {
        let Some(id) = self.slots.get_mut(index).and_then(|s| s.take(kind)) else {
            return false;
        };
        self.problem.remove_residual_block(id)
    }

    /// Retracts every constraint that references an index below `boundary`.
    fn retract_before(&mut self, boundary: usize) -> usize {
        let mut retracted = 0;
        for to in 0..self.slots.len() {
            let slot = self.slots[to];
            if slot.is_empty() {
                continue;
            }
            let below = to < boundary;
            if below {
                for kind in [ConstraintKind::Absolute, ConstraintKind::ImuOrientation] {
                    retracted += usize::from(self.retract(to, kind));
                }
            }
            if let Some((_, from)) = slot.relative {
                if below || from < boundary {
                    retracted += usize::from(self.retract(to, ConstraintKind::Relative));
                }
            }
        }
        retracted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{pose_from_parts, pose_identity};
    use approx::assert_abs_diff_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    fn translation(x: f64) -> Pose {
        pose_from_parts(&Vector3::new(x, 0.0, 0.0), &UnitQuaternion::identity())
    }

    fn windowed(size: usize) -> PoseGraph {
        PoseGraph::new(SolverConfig {
            sliding_window_size: size,
            num_threads: 1,
            ..Default::default()
        })
    }

    /// Builds a straight chain of `n` poses with unit relative edges.
    fn chain(graph: &mut PoseGraph, n: usize) -> Vec<Pose> {
        let mut poses = vec![pose_identity()];
        graph
            .add_constraint(&poses, 0, 0, &pose_identity(), EdgeKind::Absolute)
            .unwrap();
        for i in 1..n {
            poses.push(translation(i as f64));
            graph
                .add_constraint(&poses, i - 1, i, &translation(1.0), EdgeKind::Relative)
                .unwrap();
        }
        poses
    }

    #[test]
    fn test_first_constraint_fixes_origin() {
        let mut graph = windowed(100);
        assert_eq!(graph.fixed_index(), None);

        let poses = vec![pose_identity()];
        graph
            .add_constraint(&poses, 0, 0, &pose_identity(), EdgeKind::Absolute)
            .unwrap();
        assert_eq!(graph.fixed_index(), Some(0));
        assert!(graph.problem().is_parameter_block_constant(0));
    }

    #[test]
    fn test_out_of_range_constraint_is_rejected() {
        let mut graph = windowed(100);
        let poses = vec![pose_identity()];
        let err = graph
            .add_constraint(&poses, 0, 3, &pose_identity(), EdgeKind::Relative)
            .unwrap_err();
        assert_eq!(err, GraphError::IndexOutOfRange { index: 3, len: 1 });
        assert_eq!(graph.problem().num_residual_blocks(), 0);
    }

    #[test]
    fn test_same_kind_at_same_index_replaces() {
        let mut graph = windowed(100);
        let poses = vec![pose_identity(), translation(1.0)];
        graph
            .add_constraint(&poses, 0, 1, &translation(1.0), EdgeKind::Absolute)
            .unwrap();
        graph
            .add_constraint(&poses, 0, 1, &translation(1.1), EdgeKind::Absolute)
            .unwrap();
        assert_eq!(graph.num_constraints(ConstraintKind::Absolute), 1);
        assert_eq!(graph.problem().num_residual_blocks(), 1);
    }

    #[test]
    fn test_window_advances_and_retracts() {
        let mut graph = windowed(3);
        let poses = chain(&mut graph, 6);

        // len 6, window 3 -> boundary 3
        assert_eq!(graph.fixed_index(), Some(3));
        assert!(graph.problem().is_parameter_block_constant(3));

        // Edges 3->4 and 4->5 survive; 2->3 reached behind the boundary.
        assert_eq!(graph.num_constraints(ConstraintKind::Relative), 2);
        assert_eq!(graph.num_constraints(ConstraintKind::Absolute), 0);
        assert!(graph.constraint_indices().iter().all(|&i| i >= 3));
        assert_eq!(graph.problem().num_residual_blocks(), 2);
        assert_eq!(poses.len(), 6);
    }

    #[test]
    fn test_fixed_index_is_single_and_non_decreasing() {
        let mut graph = windowed(4);
        let mut poses = vec![pose_identity()];
        graph
            .add_constraint(&poses, 0, 0, &pose_identity(), EdgeKind::Absolute)
            .unwrap();

        let mut last = graph.fixed_index().unwrap();
        for i in 1..20 {
            poses.push(translation(i as f64));
            graph
                .add_constraint(&poses, i - 1, i, &translation(1.0), EdgeKind::Relative)
                .unwrap();
            let fixed = graph.fixed_index().unwrap();
            assert!(fixed >= last);
            assert!(fixed < poses.len());
            assert!(graph.constraint_indices().iter().all(|&j| j >= fixed));
            last = fixed;
        }
        assert_eq!(last, 16);
    }

    #[test]
    fn test_disabled_window_never_advances() {
        let mut graph = PoseGraph::new(SolverConfig {
            use_sliding_window: false,
            sliding_window_size: 2,
            num_threads: 1,
            ..Default::default()
        });
        chain(&mut graph, 10);
        assert_eq!(graph.fixed_index(), Some(0));
        assert_eq!(graph.num_constraints(ConstraintKind::Relative), 9);
    }

    #[test]
    fn test_frozen_index_is_rejected() {
        let mut graph = windowed(2);
        let poses = chain(&mut graph, 5);
        assert_eq!(graph.fixed_index(), Some(3));

        let err = graph
            .add_constraint(&poses, 1, 4, &translation(3.0), EdgeKind::Relative)
            .unwrap_err();
        assert_eq!(err, GraphError::FrozenIndex { index: 1, fixed: 3 });
    }

    #[test]
    fn test_imu_constraint_ignores_out_of_range() {
        let mut graph = windowed(100);
        let poses = vec![pose_identity()];
        graph.add_imu_constraint(&poses, 5, &ImuSample::default());
        assert_eq!(graph.problem().num_residual_blocks(), 0);
        assert!(!graph.has_constraint(ConstraintKind::ImuOrientation, 5));
    }

    #[test]
    fn test_imu_constraint_alone_fixes_origin() {
        let mut graph = windowed(100);
        let poses = vec![pose_identity(), translation(1.0)];
        graph.add_imu_constraint(&poses, 1, &ImuSample::default());
        assert!(graph.has_constraint(ConstraintKind::ImuOrientation, 1));
        assert_eq!(graph.fixed_index(), Some(0));
        assert!(graph.problem().is_parameter_block_constant(0));
    }

    #[test]
    fn test_window_retracts_imu_constraints() {
        let mut graph = windowed(5);
        let mut poses = vec![pose_identity()];
        graph
            .add_constraint(&poses, 0, 0, &pose_identity(), EdgeKind::Absolute)
            .unwrap();
        for i in 1..10 {
            poses.push(translation(i as f64));
            graph
                .add_constraint(&poses, i - 1, i, &translation(1.0), EdgeKind::Relative)
                .unwrap();
            if i % 3 == 0 {
                graph.add_imu_constraint(&poses, i, &ImuSample::default());
            }
        }

        // len 10, window 5 -> boundary 5; IMU at 3 is gone, 6 and 9 remain.
        let fixed = graph.fixed_index().unwrap();
        assert_eq!(fixed, 5);
        assert!((0..fixed).all(|i| !graph.has_constraint(ConstraintKind::ImuOrientation, i)));
        assert_eq!(graph.num_constraints(ConstraintKind::ImuOrientation), 2);
        assert!(graph.constraint_indices().iter().all(|&i| i >= fixed));
        assert_eq!(graph.problem().num_residual_blocks(), 4 + 2);
    }

    #[test]
    fn test_constraint_at_fixed_index_is_accepted() {
        let mut graph = windowed(2);
        let poses = chain(&mut graph, 5);
        assert_eq!(graph.fixed_index(), Some(3));

        graph
            .add_constraint(&poses, 3, 4, &translation(1.0), EdgeKind::Relative)
            .unwrap();
        graph.add_imu_constraint(&poses, 3, &ImuSample::default());
        assert!(graph.has_constraint(ConstraintKind::ImuOrientation, 3));
        graph.add_imu_constraint(&poses, 2, &ImuSample::default());
        assert!(!graph.has_constraint(ConstraintKind::ImuOrientation, 2));
    }

    #[test]
    fn test_optimize_pulls_pose_towards_measurements() {
        let mut graph = windowed(100);
        let mut poses = vec![pose_identity(), translation(1.4)];
        graph
            .add_constraint(&poses, 0, 0, &pose_identity(), EdgeKind::Absolute)
            .unwrap();
        graph
            .add_constraint(&poses, 0, 1, &translation(1.0), EdgeKind::Relative)
            .unwrap();
        graph
            .add_constraint(&poses, 0, 1, &translation(1.0), EdgeKind::Absolute)
            .unwrap();

        let summary = graph.optimize(&mut poses);
        assert!(summary.is_usable());
        assert_abs_diff_eq!(poses[1][0], 1.0, epsilon = 1e-3);
        assert_eq!(poses[0], pose_identity());
        assert!(graph.last_summary().is_some());
    }
}
