// meridian_core/src/graph/solver.rs

//! Nonlinear least-squares solving over a [`Problem`].
//!
//! The minimizer works on the tangent space of the free poses: six degrees of
//! freedom for a pose on [`PoseManifold`], seven for a block without one.
//! Robust losses enter as iteratively re-weighted least squares: each block's
//! residual and Jacobian are scaled by `sqrt(rho'(s))` before assembly.

use crate::config::SolverConfig;
use crate::graph::factors::Residual;
use crate::graph::manifold::PoseManifold;
use crate::graph::problem::{Problem, ResidualBlock};
use crate::types::Pose;
use nalgebra::{DMatrix, DVector, Vector6};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Central-difference step for numeric Jacobians.
const JACOBIAN_STEP: f64 = 1e-6;
/// Consecutive rejected steps (singular system or non-finite cost) before giving up.
const MAX_CONSECUTIVE_INVALID_STEPS: usize = 5;
const INITIAL_LAMBDA: f64 = 1e-4;
const MIN_LAMBDA: f64 = 1e-16;
const MAX_LAMBDA: f64 = 1e16;

#[derive(Debug, Clone)]
pub struct SolverOptions {
    pub max_iterations: usize,
    pub num_threads: usize,
    /// Log every iteration at `info` instead of `debug`.
    pub verbose: bool,
    /// Stop when `|cost - new_cost| / cost` drops below this.
    pub function_tolerance: f64,
    /// Stop when the max-norm of the gradient drops below this.
    pub gradient_tolerance: f64,
    /// Stop when `|dx| <= tol * (|x| + tol)`.
    pub parameter_tolerance: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            num_threads: 4,
            verbose: false,
            function_tolerance: 1e-6,
            gradient_tolerance: 1e-10,
            parameter_tolerance: 1e-8,
        }
    }
}

impl From<&SolverConfig> for SolverOptions {
    fn from(config: &SolverConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            num_threads: config.num_threads,
            verbose: config.verbose,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationType {
    /// A tolerance was met.
    Convergence,
    /// Iteration cap reached. The poses still moved downhill and are usable.
    NoConvergence,
    /// The problem could not be evaluated or no valid step could be found.
    Failure,
}

#[derive(Debug, Clone)]
pub struct SolverSummary {
    pub termination: TerminationType,
    pub iterations: usize,
    pub successful_steps: usize,
    pub initial_cost: f64,
    pub final_cost: f64,
    pub num_residual_blocks: usize,
    pub num_free_parameter_blocks: usize,
    pub message: String,
}

impl SolverSummary {
    /// Whether the poses left behind by the solver can be trusted.
    pub fn is_usable(&self) -> bool {
        self.termination != TerminationType::Failure
    }

    /// One-line report suitable for logs.
    pub fn brief_report(&self) -> String {
        format!(
            "{:?}: {} iterations ({} accepted), cost {:.6e} -> {:.6e}, {} blocks over {} free poses ({})",
            self.termination,
            self.iterations,
            self.successful_steps,
            self.initial_cost,
            self.final_cost,
            self.num_residual_blocks,
            self.num_free_parameter_blocks,
            self.message
        )
    }
}

impl fmt::Display for SolverSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.brief_report())
    }
}

// --- SOLVER TRAIT ---
/// Minimizes a [`Problem`] in place over the pose arena.
///
/// Poses not referenced by any residual block, or held constant, are never
/// written.
pub trait LeastSquaresSolver: fmt::Debug + Send + Sync {
    fn solve(&self, options: &SolverOptions, problem: &Problem, poses: &mut [Pose]) -> SolverSummary;
}

// =========================================================================
// == Levenberg-Marquardt ==
// =========================================================================

/// Where each free parameter block lives in the stacked tangent vector.
struct TangentLayout {
    blocks: Vec<(usize, usize, usize)>, // (arena index, offset, dim)
    slots: HashMap<usize, (usize, usize)>,
    manifold: HashMap<usize, bool>,
    dim: usize,
}

impl TangentLayout {
    fn new(problem: &Problem) -> Self {
        let mut blocks = Vec::new();
        let mut slots = HashMap::new();
        let mut manifold = HashMap::new();
        let mut dim = 0;
        for index in problem.free_parameter_blocks() {
            let on_manifold = problem.has_manifold(index);
            let d = if on_manifold {
                PoseManifold::TANGENT_DIM
            } else {
                PoseManifold::AMBIENT_DIM
            };
            blocks.push((index, dim, d));
            slots.insert(index, (dim, d));
            manifold.insert(index, on_manifold);
            dim += d;
        }
        Self {
            blocks,
            slots,
            manifold,
            dim,
        }
    }

    fn plus(&self, index: usize, pose: &Pose, delta: &[f64]) -> Pose {
        if self.manifold.get(&index).copied().unwrap_or(false) {
            PoseManifold::plus(pose, &Vector6::from_column_slice(delta))
        } else {
            let mut next = *pose;
            for (v, d) in next.iter_mut().zip(delta) {
                *v += d;
            }
            next
        }
    }

    fn retract(&self, poses: &[Pose], step: &DVector<f64>) -> Vec<Pose> {
        let mut next = poses.to_vec();
        for &(index, offset, d) in &self.blocks {
            next[index] = self.plus(index, &poses[index], &step.as_slice()[offset..offset + d]);
        }
        next
    }

    fn parameter_norm(&self, poses: &[Pose]) -> f64 {
        self.blocks
            .iter()
            .map(|&(index, _, _)| poses[index].norm_squared())
            .sum::<f64>()
            .sqrt()
    }
}

/// A residual block linearized at the current estimate, already scaled by
/// `sqrt(rho')`.
struct Linearization {
    residual: Residual,
    jacobians: Vec<(usize, DMatrix<f64>)>, // (tangent offset, 6 x dim)
}

fn linearize(block: &ResidualBlock, poses: &[Pose], layout: &TangentLayout) -> Linearization {
    let args: Vec<Pose> = block.parameters.iter().map(|&i| poses[i]).collect();
    let evaluate = |values: &[Pose]| {
        let refs: Vec<&Pose> = values.iter().collect();
        block.cost.evaluate(&refs)
    };

    let r = evaluate(&args);
    let s = r.norm_squared();
    let sqrt_w = block.loss.weight(s).max(0.0).sqrt();

    let mut jacobians = Vec::new();
    for (k, &index) in block.parameters.iter().enumerate() {
        let Some(&(offset, d)) = layout.slots.get(&index) else {
            continue;
        };
        let mut j = DMatrix::zeros(r.len(), d);
        let mut delta = vec![0.0; d];
        for col in 0..d {
            let mut perturbed = args.clone();

            delta[col] = JACOBIAN_STEP;
            perturbed[k] = layout.plus(index, &args[k], &delta);
            let r_plus = evaluate(&perturbed);

            delta[col] = -JACOBIAN_STEP;
            perturbed[k] = layout.plus(index, &args[k], &delta);
            let r_minus = evaluate(&perturbed);

            delta[col] = 0.0;
            j.set_column(col, &((r_plus - r_minus) * (sqrt_w / (2.0 * JACOBIAN_STEP))));
        }
        jacobians.push((offset, j));
    }

    Linearization {
        residual: r * sqrt_w,
        jacobians,
    }
}

/// Dense Levenberg-Marquardt with numeric Jacobians.
///
/// Residual blocks are linearized in parallel on a rayon pool sized by
/// `SolverOptions::num_threads`; the pool is built on first use and rebuilt
/// only when the thread count changes.
#[derive(Debug, Default)]
pub struct LevenbergMarquardt {
    pool: Mutex<Option<(usize, Arc<rayon::ThreadPool>)>>,
}

impl LevenbergMarquardt {
    pub fn new() -> Self {
        Self::default()
    }

    fn pool(&self, num_threads: usize) -> Option<Arc<rayon::ThreadPool>> {
        if num_threads <= 1 {
            return None;
        }
        let mut cached = self.pool.lock();
        if let Some((n, pool)) = cached.as_ref() {
            if *n == num_threads {
                return Some(Arc::clone(pool));
            }
        }
        match rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("meridian-solver-{i}"))
            .build()
        {
            Ok(pool) => {
                let pool = Arc::new(pool);
                *cached = Some((num_threads, Arc::clone(&pool)));
                Some(pool)
            }
            Err(e) => {
                warn!("Could not build a {num_threads}-thread solver pool, evaluating serially: {e}");
                None
            }
        }
    }

    fn linearize_all(
        &self,
        pool: Option<&rayon::ThreadPool>,
        blocks: &[&ResidualBlock],
        poses: &[Pose],
        layout: &TangentLayout,
    ) -> Vec<Linearization> {
        match pool {
            Some(pool) => pool.install(|| {
                blocks
                    .par_iter()
                    .map(|b| linearize(b, poses, layout))
                    .collect()
            }),
            None => blocks.iter().map(|b| linearize(b, poses, layout)).collect(),
        }
    }

    fn cost(&self, pool: Option<&rayon::ThreadPool>, blocks: &[&ResidualBlock], poses: &[Pose]) -> f64 {
        let sum: f64 = match pool {
            Some(pool) => pool.install(|| blocks.par_iter().map(|b| b.cost(poses)).sum::<f64>()),
            None => blocks.iter().map(|b| b.cost(poses)).sum(),
        };
        0.5 * sum
    }
}

/// Accumulates the normal equations `H = J^T J`, `g = J^T r`.
fn assemble(linearizations: &[Linearization], dim: usize) -> (DMatrix<f64>, DVector<f64>) {
    let mut h = DMatrix::zeros(dim, dim);
    let mut g = DVector::zeros(dim);
    for lin in linearizations {
        for (oa, ja) in &lin.jacobians {
            let da = ja.ncols();
            let mut g_rows = g.rows_mut(*oa, da);
            g_rows += ja.transpose() * lin.residual;
            for (ob, jb) in &lin.jacobians {
                let db = jb.ncols();
                let mut block = h.view_mut((*oa, *ob), (da, db));
                block += ja.transpose() * jb;
            }
        }
    }
    (h, g)
}

impl LeastSquaresSolver for LevenbergMarquardt {
    fn solve(&self, options: &SolverOptions, problem: &Problem, poses: &mut [Pose]) -> SolverSummary {
        let layout = TangentLayout::new(problem);
        let blocks: Vec<&ResidualBlock> = problem.residual_blocks().map(|(_, b)| b).collect();
        let pool = self.pool(options.num_threads);
        let pool = pool.as_deref();

        let mut summary = SolverSummary {
            termination: TerminationType::Convergence,
            iterations: 0,
            successful_steps: 0,
            initial_cost: 0.0,
            final_cost: 0.0,
            num_residual_blocks: blocks.len(),
            num_free_parameter_blocks: layout.blocks.len(),
            message: String::new(),
        };

        let mut current = poses.to_vec();
        let mut cost = self.cost(pool, &blocks, &current);
        summary.initial_cost = cost;
        summary.final_cost = cost;

        if !cost.is_finite() {
            summary.termination = TerminationType::Failure;
            summary.message = "initial cost is not finite".to_string();
            return summary;
        }
        if layout.dim == 0 {
            summary.message = "no free parameters".to_string();
            return summary;
        }

        let mut lambda = INITIAL_LAMBDA;
        let mut invalid_steps = 0;
        let mut relinearize = true;
        let mut h = DMatrix::zeros(0, 0);
        let mut g = DVector::zeros(0);
        summary.termination = TerminationType::NoConvergence;
        summary.message = "maximum number of iterations reached".to_string();

        for iteration in 0..options.max_iterations {
            summary.iterations = iteration + 1;

            if relinearize {
                let lins = self.linearize_all(pool, &blocks, &current, &layout);
                (h, g) = assemble(&lins, layout.dim);
                relinearize = false;

                let gradient_max = g.amax();
                if gradient_max <= options.gradient_tolerance {
                    summary.termination = TerminationType::Convergence;
                    summary.message = format!("gradient tolerance reached ({gradient_max:.3e})");
                    break;
                }
            }

            // H + lambda * diag(H)
            let mut damped = h.clone();
            for i in 0..layout.dim {
                damped[(i, i)] += lambda * h[(i, i)].max(1e-6);
            }

            let step = damped.cholesky().map(|c| c.solve(&(-&g)));
            let candidate = step.and_then(|dx| {
                let trial = layout.retract(&current, &dx);
                let trial_cost = self.cost(pool, &blocks, &trial);
                trial_cost.is_finite().then_some((dx, trial, trial_cost))
            });

            let Some((dx, trial, trial_cost)) = candidate else {
                invalid_steps += 1;
                lambda = (lambda * 10.0).min(MAX_LAMBDA);
                debug!(iteration, lambda, "Rejected invalid step");
                if invalid_steps >= MAX_CONSECUTIVE_INVALID_STEPS {
                    summary.termination = TerminationType::Failure;
                    summary.message = format!("{invalid_steps} consecutive invalid steps");
                    break;
                }
                continue;
            };
            invalid_steps = 0;

            if options.verbose {
                info!(iteration, cost, trial_cost, lambda, step_norm = dx.norm(), "LM iteration");
            } else {
                debug!(iteration, cost, trial_cost, lambda, step_norm = dx.norm(), "LM iteration");
            }

            let x_norm = layout.parameter_norm(&current);
            if dx.norm() <= options.parameter_tolerance * (x_norm + options.parameter_tolerance) {
                summary.termination = TerminationType::Convergence;
                summary.message = "parameter tolerance reached".to_string();
                break;
            }

            if trial_cost < cost {
                let relative_decrease = (cost - trial_cost) / cost.max(f64::MIN_POSITIVE);
                current = trial;
                cost = trial_cost;
                summary.successful_steps += 1;
                lambda = (lambda / 3.0).max(MIN_LAMBDA);
                relinearize = true;

                if relative_decrease < options.function_tolerance {
                    summary.termination = TerminationType::Convergence;
                    summary.message = format!("function tolerance reached ({relative_decrease:.3e})");
                    break;
                }
            } else {
                lambda = (lambda * 10.0).min(MAX_LAMBDA);
            }
        }

        for &(index, _, _) in &layout.blocks {
            poses[index] = current[index];
        }
        summary.final_cost = cost;
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::factors::{AbsolutePoseFactor, CostFunction, RelativePoseFactor};
    use crate::graph::loss::{CauchyLoss, TrivialLoss, TukeyLoss};
    use crate::types::{pose_from_parts, pose_identity, pose_rotation};
    use approx::assert_abs_diff_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    fn pose(x: f64, y: f64, yaw: f64) -> Pose {
        pose_from_parts(
            &Vector3::new(x, y, 0.0),
            &UnitQuaternion::from_euler_angles(0.0, 0.0, yaw),
        )
    }

    /// A residual that is NaN everywhere.
    #[derive(Debug, Clone)]
    struct Poisoned;

    impl CostFunction for Poisoned {
        fn parameter_count(&self) -> usize {
            1
        }

        fn evaluate(&self, _poses: &[&Pose]) -> Residual {
            Residual::repeat(f64::NAN)
        }
    }

    #[test]
    fn test_empty_problem_converges() {
        let problem = Problem::new();
        let mut poses = vec![pose_identity()];
        let summary = LevenbergMarquardt::new().solve(&SolverOptions::default(), &problem, &mut poses);
        assert_eq!(summary.termination, TerminationType::Convergence);
        assert!(summary.is_usable());
        assert_eq!(summary.iterations, 0);
    }

    #[test]
    fn test_anchored_chain_converges_to_measurements() {
        let mut problem = Problem::new();
        problem.add_residual_block(
            Box::new(AbsolutePoseFactor::new(&pose_identity())),
            Box::new(TukeyLoss::new(1.0)),
            vec![0],
        );
        problem.add_residual_block(
            Box::new(RelativePoseFactor::new(&pose(1.0, 0.0, 0.1))),
            Box::new(CauchyLoss::new(1.0)),
            vec![0, 1],
        );
        problem.add_residual_block(
            Box::new(RelativePoseFactor::new(&pose(1.0, 0.0, 0.1))),
            Box::new(CauchyLoss::new(1.0)),
            vec![1, 2],
        );
        for i in 0..3 {
            problem.set_manifold(i);
        }
        problem.set_parameter_block_constant(0);

        let mut poses = vec![pose_identity(), pose(0.8, 0.2, 0.0), pose(1.5, 0.5, 0.3)];
        let options = SolverOptions {
            max_iterations: 50,
            num_threads: 2,
            ..Default::default()
        };
        let summary = LevenbergMarquardt::new().solve(&options, &problem, &mut poses);

        assert!(summary.is_usable(), "{}", summary.brief_report());
        assert!(summary.final_cost < summary.initial_cost);
        assert_abs_diff_eq!(summary.final_cost, 0.0, epsilon = 1e-8);

        // Pose 0 is constant and must not move.
        assert_eq!(poses[0], pose_identity());
        assert_abs_diff_eq!(poses[1][0], 1.0, epsilon = 1e-4);
        let expected_2 = Vector3::new(1.0 + 0.1_f64.cos(), 0.1_f64.sin(), 0.0);
        assert_abs_diff_eq!(poses[2][0], expected_2.x, epsilon = 1e-4);
        assert_abs_diff_eq!(poses[2][1], expected_2.y, epsilon = 1e-4);
        let (_, _, yaw) = pose_rotation(&poses[2]).euler_angles();
        assert_abs_diff_eq!(yaw, 0.2, epsilon = 1e-4);
    }

    #[test]
    fn test_poses_outside_problem_are_untouched() {
        let mut problem = Problem::new();
        problem.add_residual_block(
            Box::new(AbsolutePoseFactor::new(&pose(2.0, 0.0, 0.0))),
            Box::new(TrivialLoss),
            vec![1],
        );
        problem.set_manifold(1);

        let bystander = pose(9.0, 9.0, 1.0);
        let mut poses = vec![bystander, pose_identity()];
        let summary = LevenbergMarquardt::new().solve(&SolverOptions::default(), &problem, &mut poses);

        assert!(summary.is_usable());
        assert_eq!(poses[0], bystander);
        assert_abs_diff_eq!(poses[1][0], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_non_finite_cost_is_a_failure() {
        let mut problem = Problem::new();
        problem.add_residual_block(Box::new(Poisoned), Box::new(TrivialLoss), vec![0]);

        let mut poses = vec![pose_identity()];
        let summary = LevenbergMarquardt::new().solve(&SolverOptions::default(), &problem, &mut poses);
        assert_eq!(summary.termination, TerminationType::Failure);
        assert!(!summary.is_usable());
        assert_eq!(poses[0], pose_identity());
    }

    #[test]
    fn test_iteration_cap_is_still_usable() {
        let mut problem = Problem::new();
        problem.add_residual_block(
            Box::new(AbsolutePoseFactor::new(&pose(5.0, -3.0, 1.0))),
            Box::new(CauchyLoss::new(1.0)),
            vec![0],
        );
        problem.set_manifold(0);

        let mut poses = vec![pose_identity()];
        let options = SolverOptions {
            max_iterations: 1,
            num_threads: 1,
            ..Default::default()
        };
        let summary = LevenbergMarquardt::new().solve(&options, &problem, &mut poses);
        assert_eq!(summary.iterations, 1);
        assert!(summary.is_usable());
    }
}
