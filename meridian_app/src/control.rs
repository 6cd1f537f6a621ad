// meridian_app/src/control.rs

//! The foreground side of a run: user commands in, progress and snapshots out,
//! while the frame processor works on its own thread.

use crossbeam_channel::{Receiver, TryRecvError};
use meridian_core::prelude::*;
use std::io::BufRead;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    TogglePause,
    Quit,
}

impl UserCommand {
    /// `p` / `pause` toggles, `q` / `quit` stops. Anything else is ignored.
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "p" | "pause" | "resume" => Some(Self::TogglePause),
            "q" | "quit" | "stop" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Reads commands from stdin on a detached thread.
///
/// The thread ends with stdin; a closed channel just means no more commands.
pub fn spawn_stdin_commands() -> std::io::Result<Receiver<UserCommand>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("meridian-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match UserCommand::parse(&line) {
                    Some(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    None if !line.trim().is_empty() => {
                        warn!("Unknown command {:?} (use 'p' to pause/resume, 'q' to quit)", line.trim())
                    }
                    None => {}
                }
            }
        })?;
    Ok(rx)
}

/// Requests a stop on Ctrl-C. A second handler cannot be installed in the
/// same process, so failure is only logged.
pub fn install_interrupt_handler(control: &RunControl) {
    let control = control.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Interrupt received, stopping after the current frame");
        control.request_stop();
    }) {
        warn!("Could not install Ctrl-C handler: {e}");
    }
}

fn apply(command: UserCommand, control: &RunControl) {
    match command {
        UserCommand::TogglePause => match control.toggle_pause() {
            RunState::Paused => info!("Paused ('p' to resume)"),
            RunState::Running => info!("Resumed"),
            RunState::Stopped => {}
        },
        UserCommand::Quit => {
            info!("Quit requested");
            control.request_stop();
        }
    }
}

fn log_snapshot(snapshot: &FrameSnapshot) {
    let kind = match snapshot.kind {
        FrameKind::Optimized => "optimized",
        FrameKind::Stationary => "stationary",
    };
    debug!(
        scan = snapshot.scan_index,
        kind,
        x = snapshot.pose[0],
        y = snapshot.pose[1],
        z = snapshot.pose[2],
        map_points = snapshot.local_map.len(),
        "Frame snapshot"
    );
}

/// Polls until the runner finishes, then joins it.
///
/// Every tick drains pending snapshots and commands; progress is logged every
/// couple of seconds.
pub fn supervise(
    runner: PipelineRunner,
    snapshots: Receiver<FrameSnapshot>,
    commands: Option<Receiver<UserCommand>>,
) -> RunOutcome {
    let mut commands = commands;
    let mut last_report = Instant::now();
    let mut latest: Option<FrameSnapshot> = None;

    while !runner.is_finished() {
        for snapshot in snapshots.try_iter() {
            log_snapshot(&snapshot);
            latest = Some(snapshot);
        }

        if let Some(rx) = &commands {
            match rx.try_recv() {
                Ok(cmd) => apply(cmd, runner.control()),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => commands = None,
            }
        }

        if last_report.elapsed() >= PROGRESS_INTERVAL {
            let p = runner.progress().snapshot();
            info!(
                "Progress: {}/{} frames ({} stationary, {} skipped), last frame {:.1} ms",
                p.frames_processed,
                p.total_frames,
                p.stationary_frames,
                p.skipped_frames,
                p.last_frame.as_secs_f64() * 1e3
            );
            last_report = Instant::now();
        }

        thread::sleep(POLL_INTERVAL);
    }

    if let Some(last) = latest {
        info!(
            "Last frame {} at ({:.2}, {:.2}, {:.2})",
            last.scan_index, last.pose[0], last.pose[1], last.pose[2]
        );
    }
    runner.join()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(UserCommand::parse("p\n"), Some(UserCommand::TogglePause));
        assert_eq!(UserCommand::parse(" Q "), Some(UserCommand::Quit));
        assert_eq!(UserCommand::parse("stop"), Some(UserCommand::Quit));
        assert_eq!(UserCommand::parse("x"), None);
        assert_eq!(UserCommand::parse(""), None);
    }

    #[test]
    fn test_apply_maps_onto_control() {
        let control = RunControl::new();
        apply(UserCommand::TogglePause, &control);
        assert_eq!(control.state(), RunState::Paused);
        apply(UserCommand::TogglePause, &control);
        assert_eq!(control.state(), RunState::Running);
        apply(UserCommand::Quit, &control);
        assert!(control.is_stopped());
    }
}
