// meridian_app/src/io/trajectory.rs

//! Trajectory CSV: a `x,y,z,qx,qy,qz,qw` header and one row per pose.

use meridian_core::error::DatasetError;
use meridian_core::types::Pose;
use serde::{Deserialize, Serialize};
use std::path::Path;

const HEADER: [&str; 7] = ["x", "y", "z", "qx", "qy", "qz", "qw"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct TrajectoryRow {
    x: f64,
    y: f64,
    z: f64,
    qx: f64,
    qy: f64,
    qz: f64,
    qw: f64,
}

impl From<&Pose> for TrajectoryRow {
    fn from(p: &Pose) -> Self {
        Self {
            x: p[0],
            y: p[1],
            z: p[2],
            qx: p[3],
            qy: p[4],
            qz: p[5],
            qw: p[6],
        }
    }
}

impl From<TrajectoryRow> for Pose {
    fn from(r: TrajectoryRow) -> Self {
        Pose::from_column_slice(&[r.x, r.y, r.z, r.qx, r.qy, r.qz, r.qw])
    }
}

pub fn write_trajectory(path: &Path, poses: &[Pose]) -> Result<(), DatasetError> {
    let write_err = |e: csv::Error| DatasetError::Write {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    // Header written by hand so an empty trajectory still carries it.
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(write_err)?;
    writer.write_record(HEADER).map_err(write_err)?;
    for pose in poses {
        writer.serialize(TrajectoryRow::from(pose)).map_err(write_err)?;
    }
    writer.flush().map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Reads a trajectory written by [`write_trajectory`].
pub fn read_trajectory(path: &Path) -> Result<Vec<Pose>, DatasetError> {
    let format_err = |e: csv::Error| DatasetError::Format {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let mut reader = csv::Reader::from_path(path).map_err(format_err)?;
    reader
        .deserialize::<TrajectoryRow>()
        .map(|row| row.map(Pose::from).map_err(format_err))
        .collect()
}
