// meridian_core/src/lib.rs

pub mod config;
pub mod error;
pub mod graph;
pub mod messages;
pub mod models;
pub mod pipeline;
pub mod prelude;
pub mod types;
