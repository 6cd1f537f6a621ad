// meridian_app/src/main.rs

use anyhow::{bail, Context, Result};
use clap::Parser;
use meridian_app::cli::{Cli, Command, RunArgs, SynthArgs};
use meridian_app::config::AppConfig;
use meridian_app::control::{install_interrupt_handler, spawn_stdin_commands};
use meridian_app::simulation::{self, SceneConfig};
use meridian_core::pipeline::RunControl;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Run(args) => run(&args),
        Command::Synth(args) => synth(&args),
    }
}

fn run(args: &RunArgs) -> Result<()> {
    let mut config = AppConfig::load(&args.config)?;
    config.apply_overrides(args)?;

    let control = RunControl::new();
    install_interrupt_handler(&control);
    let commands = if args.headless {
        None
    } else {
        info!("Type 'p' + Enter to pause/resume, 'q' + Enter to quit");
        Some(spawn_stdin_commands().context("Failed to start stdin reader")?)
    };

    let outcome = meridian_app::run(&config, control, commands)?;
    if outcome.stopped_early {
        warn!("Run stopped before the last scan");
    }
    info!(
        "{} frames processed, {} poses written to {:?}",
        outcome.frames, outcome.trajectory_len, config.paths.output
    );
    if let Some(e) = outcome.error {
        bail!("Run failed: {e}");
    }
    Ok(())
}

fn synth(args: &SynthArgs) -> Result<()> {
    let summary = simulation::generate(&args.out, args.frames, args.seed, &SceneConfig::default())
        .with_context(|| format!("Failed to generate dataset in {:?}", args.out))?;
    info!(
        "Wrote {} frames and a {}-point map. Run it with: meridian run --map {:?} --scans {:?} --imu {:?}",
        summary.frames,
        summary.map_points,
        summary.layout.map(),
        summary.layout.scans(),
        summary.layout.imu()
    );
    Ok(())
}
