// meridian_core/src/graph/mod.rs

//! Sliding-window pose graph and the least-squares machinery behind it.

pub mod factors;
pub mod loss;
pub mod manifold;
pub mod pose_graph;
pub mod problem;
pub mod solver;

pub use manifold::PoseManifold;
pub use pose_graph::{ConstraintKind, EdgeKind, PoseGraph};
pub use problem::{Problem, ResidualBlockId};
pub use solver::{
    LeastSquaresSolver, LevenbergMarquardt, SolverOptions, SolverSummary, TerminationType,
};
