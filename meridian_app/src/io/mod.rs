// meridian_app/src/io/mod.rs

//! On-disk formats: KITTI scans, PCD maps, trajectory CSV, and the
//! [`FileDataset`] that ties them to the frame processor.

pub mod dataset;
pub mod kitti;
pub mod pcd;
pub mod trajectory;

pub use dataset::FileDataset;
