// meridian_app/src/lib.rs

//! The runnable side of Meridian: file formats, the ICP registration
//! services, configuration, synthetic data and the foreground control loop.

pub mod cli;
pub mod config;
pub mod control;
pub mod io;
pub mod registration;
pub mod simulation;

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use meridian_core::prelude::*;
use tracing::info;

use crate::config::AppConfig;
use crate::control::UserCommand;
use crate::io::FileDataset;
use crate::registration::IcpRegistration;

// =========================================================================
// == Wiring ==
// =========================================================================

/// Builds a frame processor from the configuration: file-backed dataset and
/// one ICP service per registration role.
pub fn build_processor(config: &AppConfig) -> FrameProcessor {
    let dataset = FileDataset::new(&config.paths.output).with_imu_dir(config.paths.imu.clone());
    let scan2map = IcpRegistration::scan_to_map(&config.registration, config.preprocess.clone());
    let scan2scan = IcpRegistration::scan_to_scan(&config.registration, config.preprocess.clone());
    FrameProcessor::new(
        config.pipeline.clone(),
        config.solver.clone(),
        Box::new(dataset),
        Box::new(scan2map),
        Box::new(scan2scan),
    )
}

/// Bootstraps on the configured dataset, processes it on a background
/// thread and supervises it from the calling thread until it ends.
///
/// Stopping goes through `control`; `commands` optionally feeds user
/// commands into it.
pub fn run(
    config: &AppConfig,
    control: RunControl,
    commands: Option<Receiver<UserCommand>>,
) -> Result<RunOutcome> {
    let mut processor = build_processor(config);
    let snapshots = processor.subscribe();

    processor
        .initialize(
            &config.paths.map,
            &config.paths.scans,
            &config.initial_pose.to_isometry(),
        )
        .with_context(|| {
            format!(
                "Bootstrap failed (map {:?}, scans {:?})",
                config.paths.map, config.paths.scans
            )
        })?;
    info!(
        "Bootstrapped on {} scans, writing to {:?}",
        processor.total_scans(),
        config.paths.output
    );

    let runner =
        PipelineRunner::spawn(processor, control).context("Failed to start processing thread")?;
    Ok(crate::control::supervise(runner, snapshots, commands))
}
