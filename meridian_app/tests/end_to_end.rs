// meridian_app/tests/end_to_end.rs

//! Generates a small synthetic dataset and localizes it from disk.

use approx::assert_abs_diff_eq;
use meridian_app::config::AppConfig;
use meridian_app::io::trajectory::read_trajectory;
use meridian_app::simulation::{self, SceneConfig};
use meridian_core::pipeline::RunControl;
use std::path::Path;

const FRAMES: usize = 6;

fn config_for(root: &Path) -> AppConfig {
    let layout = simulation::DatasetLayout::new(root);
    let mut config = AppConfig::default();
    config.paths.map = layout.map();
    config.paths.scans = layout.scans();
    config.paths.imu = Some(layout.imu());
    config.paths.output = root.join("out").join("trajectory.csv");
    config.initial_pose.translation = [0.0, 0.0, SceneConfig::default().sensor_height];
    config.solver.num_threads = 1;
    config
}

#[test]
fn synthetic_run_writes_one_row_per_scan() {
    let dir = tempfile::tempdir().unwrap();
    simulation::generate(dir.path(), FRAMES, 3, &SceneConfig::default()).unwrap();
    let config = config_for(dir.path());

    let outcome = meridian_app::run(&config, RunControl::new(), None).unwrap();
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert!(!outcome.stopped_early);
    assert_eq!(outcome.frames, FRAMES - 1);

    let estimated = read_trajectory(&config.paths.output).unwrap();
    let truth = read_trajectory(&simulation::DatasetLayout::new(dir.path()).ground_truth()).unwrap();
    assert_eq!(estimated.len(), FRAMES);
    assert_eq!(truth.len(), FRAMES);

    // Every quaternion comes out unit-norm.
    for pose in &estimated {
        let q = pose.fixed_rows::<4>(3);
        assert_abs_diff_eq!(q.norm(), 1.0, epsilon = 1e-6);
    }
    // Localization stays in the neighborhood of the truth.
    let last = FRAMES - 1;
    let dx = estimated[last][0] - truth[last][0];
    let dy = estimated[last][1] - truth[last][1];
    assert!((dx * dx + dy * dy).sqrt() < 0.5, "drifted by ({dx}, {dy})");
}

#[test]
fn missing_map_fails_bootstrap_without_output() {
    let dir = tempfile::tempdir().unwrap();
    simulation::generate(dir.path(), 2, 3, &SceneConfig::default()).unwrap();
    let mut config = config_for(dir.path());
    config.paths.map = dir.path().join("absent.pcd");

    let err = meridian_app::run(&config, RunControl::new(), None).unwrap_err();
    assert!(format!("{err:#}").contains("Bootstrap failed"));
    assert!(!config.paths.output.exists());
}

#[test]
fn stop_before_start_still_flushes_bootstrap_row() {
    let dir = tempfile::tempdir().unwrap();
    simulation::generate(dir.path(), FRAMES, 5, &SceneConfig::default()).unwrap();
    let config = config_for(dir.path());

    let control = RunControl::new();
    control.request_stop();
    let outcome = meridian_app::run(&config, control, None).unwrap();
    assert!(outcome.stopped_early);
    assert_eq!(outcome.frames, 0);
    assert_eq!(read_trajectory(&config.paths.output).unwrap().len(), 1);
}
