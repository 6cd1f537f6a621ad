// meridian_core/src/messages.rs

use crate::types::Pose;
use nalgebra::Point3;

// =========================================================================
// == Public API Messages (Topic Data) ==
// =========================================================================

/// What moved the output trajectory forward for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Constraints were added and the window re-optimized.
    Optimized,
    /// The motion gate held; the scan-to-scan pose was emitted as-is.
    Stationary,
}

/// An immutable copy of the processor state after one frame, handed to
/// visual consumers over a bounded queue. Nothing in it borrows from the
/// processor, so a slow consumer can never stall processing.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    /// Index of the scan this snapshot was taken after.
    pub scan_index: usize,
    pub kind: FrameKind,
    /// The pose emitted to the output trajectory for this scan.
    pub pose: Pose,
    /// Points of the scan-to-scan local map, in the world frame.
    pub local_map: Vec<Point3<f64>>,
    /// Number of output rows accumulated so far, this one included.
    pub trajectory_len: usize,
}
