//! Fixed-tick consumer loop driving the demo pipeline.
//!
//! Two independent cadences, matching the dual timers of the original
//! frontends: a fast frame tick advancing playback and a slower poll tick
//! draining the bridge. Neither ever blocks on the producer.

use crate::demo::{DemoCommunity, DemoConfig};
use crate::report::RunReport;
use anyhow::Result;
use evostream_bridge::{RunStatus, StopOutcome, drain_pending, spawn_producer};
use evostream_core::{PlaybackConfig, PlaybackController};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Idle sleep between scheduler checks; keeps the loop from spinning while
/// staying well under the frame interval.
const IDLE_SLEEP: Duration = Duration::from_millis(2);

/// Knobs for one pipeline run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub demo: DemoConfig,
    pub playback: PlaybackConfig,
    /// Wall-clock cap on the whole run; the loop exits once it elapses even
    /// if playback has not caught up.
    pub run_budget: Duration,
    /// Frame tick cadence (target ~60 Hz).
    pub frame_interval: Duration,
    /// Bridge poll cadence.
    pub poll_interval: Duration,
    pub channel_capacity: usize,
    pub push_timeout: Duration,
    /// Grace period granted to the producer on shutdown.
    pub stop_grace: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            demo: DemoConfig::default(),
            playback: PlaybackConfig::default(),
            run_budget: Duration::from_secs(10),
            frame_interval: Duration::from_millis(16),
            poll_interval: Duration::from_millis(100),
            channel_capacity: evostream_bridge::DEFAULT_CHANNEL_CAPACITY,
            push_timeout: evostream_bridge::DEFAULT_PUSH_TIMEOUT,
            stop_grace: Duration::from_secs(2),
        }
    }
}

/// Run the demo producer against a playback controller until the run
/// completes and playback catches up, or the wall-clock budget elapses.
pub fn run_pipeline(options: RunOptions) -> Result<RunReport> {
    let mut controller = PlaybackController::new(options.playback.clone())?;
    let (mut handle, rx) = spawn_producer(
        DemoCommunity::new(options.demo.clone()),
        options.channel_capacity,
        options.push_timeout,
    );

    let started = Instant::now();
    let mut last_frame = started;
    let mut last_poll = started.checked_sub(options.poll_interval).unwrap_or(started);

    let mut frames = 0usize;
    let mut epochs = 0usize;
    let mut repaired = 0usize;
    let mut max_gap = 0.0f64;
    let mut status: Option<RunStatus> = None;

    loop {
        let now = Instant::now();

        if now.duration_since(last_poll) >= options.poll_interval {
            let pass = drain_pending(&rx, &mut controller);
            epochs += pass.epochs;
            repaired += pass.repaired;
            if pass.status.is_some() {
                status = pass.status;
            }
            last_poll = now;
        }

        if now.duration_since(last_frame) >= options.frame_interval {
            let delta = now.duration_since(last_frame).as_secs_f64();
            if let Some(frame) = controller.poll_frame(delta) {
                frames += 1;
                debug!(
                    time = frame.time,
                    scalar = frame.scalar,
                    effective_speed = controller.effective_speed(),
                    "frame"
                );
            }
            max_gap = max_gap.max(controller.buffer_status().gap);
            last_frame = now;
        }

        // A failed run halts right away with the buffers left intact for
        // inspection; a completed run keeps ticking until playback has
        // caught up with the end of the data.
        let caught_up = controller.animation_time() >= controller.integration_time();
        match &status {
            Some(RunStatus::Error { .. }) => break,
            Some(RunStatus::Completed { .. }) if caught_up => {
                info!("run complete and playback caught up");
                break;
            }
            _ => {}
        }
        if now.duration_since(started) >= options.run_budget {
            info!(budget_secs = options.run_budget.as_secs_f64(), "run budget elapsed");
            break;
        }

        thread::sleep(IDLE_SLEEP);
    }

    let shutdown = match handle.stop(options.stop_grace) {
        StopOutcome::Joined => "joined",
        StopOutcome::Abandoned => "abandoned",
    };

    // The producer may have parked a final burst plus its terminal status
    // behind the last poll tick.
    let tail = drain_pending(&rx, &mut controller);
    epochs += tail.epochs;
    repaired += tail.repaired;
    if tail.status.is_some() {
        status = tail.status;
    }

    Ok(RunReport {
        frames,
        epochs,
        repaired,
        buffered_samples: controller.buffer_status().len,
        lineages: controller.registry().len(),
        mutation_events: controller.mutation_log().len(),
        max_gap,
        final_animation_time: controller.animation_time(),
        final_integration_time: controller.integration_time(),
        status,
        shutdown,
    })
}
