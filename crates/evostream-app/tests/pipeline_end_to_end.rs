use evostream_app::{DemoConfig, RunOptions, run_pipeline};
use evostream_bridge::RunStatus;
use evostream_core::PlaybackConfig;
use std::time::Duration;

fn fast_options() -> RunOptions {
    RunOptions {
        demo: DemoConfig {
            seed: 7,
            total_time: 30.0,
            dt: 0.5,
            steps_per_epoch: 20,
            // Branch at every epoch boundary so the run reliably produces
            // mutation events.
            branch_probability: 1.0,
            epoch_delay: Duration::from_millis(2),
            ..DemoConfig::default()
        },
        // Thresholds scaled down to the short run so playback is not pinned
        // at the critical floor, and a fast multiplier so the test finishes
        // in wall-clock seconds.
        playback: PlaybackConfig {
            default_speed: 30.0,
            buffer_critical: 0.5,
            buffer_low: 2.0,
            min_speed: 0.1,
            max_speed: 100.0,
            ..PlaybackConfig::default()
        },
        run_budget: Duration::from_secs(20),
        frame_interval: Duration::from_millis(16),
        poll_interval: Duration::from_millis(50),
        stop_grace: Duration::from_secs(2),
        ..RunOptions::default()
    }
}

#[test]
fn demo_pipeline_runs_to_completion_and_catches_up() {
    let report = run_pipeline(fast_options()).expect("pipeline");

    match report.status {
        Some(RunStatus::Completed { final_time }) => {
            assert!((final_time - 30.0).abs() < 1e-9, "got {final_time}");
        }
        other => panic!("expected completed status, got {other:?}"),
    }

    // 60 integration steps of dt=0.5, all unique, all buffered.
    assert_eq!(report.buffered_samples, 60);
    assert!(report.frames > 0);
    assert!(report.epochs >= 3);
    assert_eq!(report.repaired, 0, "demo epochs should arrive well-formed");
    assert!(report.lineages >= 1);
    assert!(report.mutation_events >= 1);
    assert_eq!(report.shutdown, "joined");

    // Playback caught up with the end of the data before the loop exited.
    assert!(report.final_integration_time >= 30.0 - 1e-9);
    assert!(
        (report.final_animation_time - report.final_integration_time).abs() < 1e-9,
        "animation {} never caught integration {}",
        report.final_animation_time,
        report.final_integration_time
    );
    assert!(report.max_gap <= 30.0 + 1e-9);
}

#[test]
fn identical_seeds_produce_identical_data() {
    let first = run_pipeline(fast_options()).expect("pipeline");
    let second = run_pipeline(fast_options()).expect("pipeline");

    // Wall-clock frame counts may differ; the data pipeline must not.
    assert_eq!(first.buffered_samples, second.buffered_samples);
    assert_eq!(first.lineages, second.lineages);
    assert_eq!(first.mutation_events, second.mutation_events);
    assert_eq!(first.final_integration_time, second.final_integration_time);
}
