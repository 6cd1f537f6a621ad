// meridian_core/src/models/mod.rs

pub mod imu;
pub mod motion;
