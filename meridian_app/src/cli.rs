// meridian_app/src/cli.rs

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Meridian: sliding-window LiDAR pose-graph localization against a prior map.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log filter, e.g. `info` or `meridian_core=debug`. `RUST_LOG` wins if set.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Localize a scan sequence against a map and write the trajectory.
    Run(RunArgs),
    /// Generate a synthetic dataset (map, scans, IMU records, ground truth).
    Synth(SynthArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// The run configuration TOML file.
    #[arg(short, long, default_value = "assets/config/default.toml")]
    pub config: PathBuf,

    /// Map point cloud (`.pcd`). Overrides `paths.map`.
    #[arg(long)]
    pub map: Option<PathBuf>,

    /// Directory of KITTI `.bin` scans. Overrides `paths.scans`.
    #[arg(long)]
    pub scans: Option<PathBuf>,

    /// Output trajectory CSV. Overrides `paths.output`.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory of OXTS records, one `.txt` per scan. Overrides `paths.imu`.
    #[arg(long)]
    pub imu: Option<PathBuf>,

    /// Initial pose guess as `x,y,z,roll,pitch,yaw`.
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    pub initial_pose: Option<Vec<f64>>,

    /// Do not read pause/quit commands from stdin.
    #[arg(long, default_value_t = false)]
    pub headless: bool,
}

#[derive(Args, Debug, Clone)]
pub struct SynthArgs {
    /// Output dataset directory.
    #[arg(short, long, default_value = "data/synthetic")]
    pub out: PathBuf,

    /// Number of scans to generate.
    #[arg(short, long, default_value_t = 60)]
    pub frames: usize,

    /// Seed for the pseudo-random generator.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}
