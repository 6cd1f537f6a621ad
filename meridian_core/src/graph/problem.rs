// meridian_core/src/graph/problem.rs

use crate::graph::factors::{CostFunction, Residual};
use crate::graph::loss::RobustLoss;
use crate::types::Pose;
use std::collections::{BTreeMap, BTreeSet};

/// Stable handle to a residual block; stays valid until the block is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResidualBlockId(u64);

#[derive(Debug, Clone)]
pub struct ResidualBlock {
    pub cost: Box<dyn CostFunction>,
    pub loss: Box<dyn RobustLoss>,
    /// Indices into the pose arena, in the order `cost` expects them.
    pub parameters: Vec<usize>,
}

impl ResidualBlock {
    pub fn residual(&self, poses: &[Pose]) -> Residual {
        let args: Vec<&Pose> = self.parameters.iter().map(|&i| &poses[i]).collect();
        self.cost.evaluate(&args)
    }

    /// `rho(|r|^2)` for this block at `poses`.
    pub fn cost(&self, poses: &[Pose]) -> f64 {
        self.loss.cost(self.residual(poses).norm_squared())
    }
}

/// A nonlinear least-squares problem over a pose arena the problem does not own.
///
/// Parameter blocks are identified by their arena index. Blocks are
/// iterated in insertion order, which keeps evaluation deterministic.
#[derive(Debug, Clone, Default)]
pub struct Problem {
    blocks: BTreeMap<ResidualBlockId, ResidualBlock>,
    next_id: u64,
    constant: BTreeSet<usize>,
    manifolds: BTreeSet<usize>,
}

impl Problem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_residual_block(
        &mut self,
        cost: Box<dyn CostFunction>,
        loss: Box<dyn RobustLoss>,
        parameters: Vec<usize>,
    ) -> ResidualBlockId {
        debug_assert_eq!(cost.parameter_count(), parameters.len());
        let id = ResidualBlockId(self.next_id);
        self.next_id += 1;
        self.blocks.insert(
            id,
            ResidualBlock {
                cost,
                loss,
                parameters,
            },
        );
        id
    }

    /// Removes a block. Returns `false` if the id was already gone.
    pub fn remove_residual_block(&mut self, id: ResidualBlockId) -> bool {
        self.blocks.remove(&id).is_some()
    }

    pub fn set_parameter_block_constant(&mut self, index: usize) {
        self.constant.insert(index);
    }

    pub fn is_parameter_block_constant(&self, index: usize) -> bool {
        self.constant.contains(&index)
    }

    /// Marks a parameter block as a pose living on [`PoseManifold`](super::PoseManifold).
    /// Blocks without a manifold are updated as plain 7-vectors.
    pub fn set_manifold(&mut self, index: usize) {
        self.manifolds.insert(index);
    }

    pub fn has_manifold(&self, index: usize) -> bool {
        self.manifolds.contains(&index)
    }

    pub fn num_residual_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn residual_block(&self, id: ResidualBlockId) -> Option<&ResidualBlock> {
        self.blocks.get(&id)
    }

    pub fn residual_blocks(&self) -> impl Iterator<Item = (ResidualBlockId, &ResidualBlock)> {
        self.blocks.iter().map(|(id, block)| (*id, block))
    }

    /// Parameter blocks referenced by at least one live residual block and not
    /// held constant, in ascending index order.
    pub fn free_parameter_blocks(&self) -> Vec<usize> {
        let referenced: BTreeSet<usize> = self
            .blocks
            .values()
            .flat_map(|b| b.parameters.iter().copied())
            .collect();
        referenced
            .into_iter()
            .filter(|i| !self.constant.contains(i))
            .collect()
    }

    /// `0.5 * sum(rho_i(|r_i|^2))`.
    pub fn total_cost(&self, poses: &[Pose]) -> f64 {
        0.5 * self.blocks.values().map(|b| b.cost(poses)).sum::<f64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::factors::{AbsolutePoseFactor, RelativePoseFactor};
    use crate::graph::loss::TrivialLoss;
    use crate::types::pose_identity;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_block_ids_are_unique_and_removable() {
        let mut problem = Problem::new();
        let a = problem.add_residual_block(
            Box::new(AbsolutePoseFactor::new(&pose_identity())),
            Box::new(TrivialLoss),
            vec![0],
        );
        let b = problem.add_residual_block(
            Box::new(RelativePoseFactor::new(&pose_identity())),
            Box::new(TrivialLoss),
            vec![0, 1],
        );
        assert_ne!(a, b);
        assert_eq!(problem.num_residual_blocks(), 2);

        assert!(problem.remove_residual_block(a));
        assert!(!problem.remove_residual_block(a));
        assert_eq!(problem.num_residual_blocks(), 1);
        assert!(problem.residual_block(b).is_some());
    }

    #[test]
    fn test_free_parameter_blocks_skip_constants_and_orphans() {
        let mut problem = Problem::new();
        problem.add_residual_block(
            Box::new(RelativePoseFactor::new(&pose_identity())),
            Box::new(TrivialLoss),
            vec![1, 2],
        );
        problem.set_parameter_block_constant(1);
        problem.set_parameter_block_constant(5);
        assert_eq!(problem.free_parameter_blocks(), vec![2]);
    }

    #[test]
    fn test_total_cost_is_half_sum_of_squares() {
        let mut problem = Problem::new();
        problem.add_residual_block(
            Box::new(AbsolutePoseFactor::new(&pose_identity())),
            Box::new(TrivialLoss),
            vec![0],
        );
        let mut p = pose_identity();
        p[0] = 2.0;
        assert_abs_diff_eq!(problem.total_cost(&[p]), 2.0, epsilon = 1e-12);
    }
}
