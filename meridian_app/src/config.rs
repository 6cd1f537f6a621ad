// meridian_app/src/config.rs

//! Loading of the run configuration: built-in defaults, overlaid by a TOML
//! file, overlaid by `MERIDIAN_`-prefixed environment variables, overlaid by
//! command-line flags.

use crate::cli::RunArgs;
use crate::registration::{PreprocessConfig, RegistrationConfig};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use meridian_core::config::{PipelineConfig, SolverConfig};
use nalgebra::{Isometry3, Translation3, UnitQuaternion};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Figment(#[from] figment::Error),

    #[error("--initial-pose takes 6 values (x,y,z,roll,pitch,yaw), got {0}")]
    InitialPoseArity(usize),
}

// =========================================================================
// == Top-Level Configuration ==
// =========================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub initial_pose: InitialPoseConfig,
    pub pipeline: PipelineConfig,
    pub solver: SolverConfig,
    pub registration: RegistrationConfig,
    pub preprocess: PreprocessConfig,
}

// =========================================================================
// == Configuration Sub-Structs ==
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PathsConfig {
    /// Prior map point cloud (`.pcd`).
    pub map: PathBuf,
    /// Directory of KITTI `.bin` scans.
    pub scans: PathBuf,
    /// Where the trajectory CSV is written.
    pub output: PathBuf,
    /// Optional directory of OXTS `.txt` records matched to scans by file stem.
    pub imu: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            map: PathBuf::from("data/synthetic/map.pcd"),
            scans: PathBuf::from("data/synthetic/scans"),
            output: PathBuf::from("trajectory.csv"),
            imu: None,
        }
    }
}

/// Initial guess for the first scan in the map frame.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InitialPoseConfig {
    pub translation: [f64; 3],
    /// Roll, pitch, yaw in radians.
    pub rpy: [f64; 3],
}

impl InitialPoseConfig {
    pub fn to_isometry(&self) -> Isometry3<f64> {
        let [x, y, z] = self.translation;
        let [roll, pitch, yaw] = self.rpy;
        Isometry3::from_parts(
            Translation3::new(x, y, z),
            UnitQuaternion::from_euler_angles(roll, pitch, yaw),
        )
    }
}

impl AppConfig {
    /// Reads `path` (if it exists) and the environment on top of the defaults.
    ///
    /// Nested keys use a double underscore in the environment, e.g.
    /// `MERIDIAN_SOLVER__MAX_ITERATIONS=20`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();
        if path.exists() {
            info!("Loading configuration from: {:?}", path);
            figment = figment.merge(Toml::file(path));
        } else {
            warn!("Config file {:?} not found, using defaults", path);
        }
        let config = figment
            .merge(Env::prefixed("MERIDIAN_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Applies command-line overrides.
    pub fn apply_overrides(&mut self, args: &RunArgs) -> Result<(), ConfigError> {
        if let Some(map) = &args.map {
            self.paths.map = map.clone();
        }
        if let Some(scans) = &args.scans {
            self.paths.scans = scans.clone();
        }
        if let Some(output) = &args.output {
            self.paths.output = output.clone();
        }
        if let Some(imu) = &args.imu {
            self.paths.imu = Some(imu.clone());
        }
        if let Some(values) = &args.initial_pose {
            let [x, y, z, roll, pitch, yaw] = values[..] else {
                return Err(ConfigError::InitialPoseArity(values.len()));
            };
            self.initial_pose = InitialPoseConfig {
                translation: [x, y, z],
                rpy: [roll, pitch, yaw],
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use meridian_core::config::EmptyFramePolicy;
    use std::io::Write;

    fn run_args() -> RunArgs {
        RunArgs {
            config: PathBuf::from("unused.toml"),
            map: None,
            scans: None,
            output: None,
            imu: None,
            initial_pose: None,
            headless: true,
        }
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = AppConfig::load(Path::new("/definitely/not/here.toml")).unwrap();
        assert_eq!(config.solver.max_iterations, 10);
        assert_eq!(config.solver.sliding_window_size, 100);
        assert_eq!(config.pipeline.absolute_inlier_threshold, 50);
        assert_eq!(config.registration.scan2scan_removal_horizon, 100);
        assert_eq!(config.registration.scan2map_max_points_per_cell, 20);
    }

    #[test]
    fn test_toml_overrides_nested_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[paths]
map = "maps/city.pcd"
imu = "oxts"

[solver]
sliding_window_size = 25

[pipeline]
empty_frame_policy = "skip"
"#
        )
        .unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.paths.map, PathBuf::from("maps/city.pcd"));
        assert_eq!(config.paths.imu, Some(PathBuf::from("oxts")));
        assert_eq!(config.solver.sliding_window_size, 25);
        assert_eq!(config.solver.max_iterations, 10);
        assert_eq!(config.pipeline.empty_frame_policy, EmptyFramePolicy::Skip);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[solver]\nmax_iteratons = 3").unwrap();
        assert!(AppConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = AppConfig::default();
        let mut args = run_args();
        args.output = Some(PathBuf::from("out.csv"));
        args.initial_pose = Some(vec![1.0, 2.0, 0.0, 0.0, 0.0, 0.3]);
        config.apply_overrides(&args).unwrap();

        assert_eq!(config.paths.output, PathBuf::from("out.csv"));
        let iso = config.initial_pose.to_isometry();
        assert_abs_diff_eq!(iso.translation.vector.y, 2.0);
        assert_abs_diff_eq!(iso.rotation.euler_angles().2, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_initial_pose_needs_six_values() {
        let mut args = run_args();
        args.initial_pose = Some(vec![1.0, 2.0]);
        let err = AppConfig::default().apply_overrides(&args).unwrap_err();
        assert!(matches!(err, ConfigError::InitialPoseArity(2)));
    }
}
