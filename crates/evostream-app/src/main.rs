use anyhow::Result;
use evostream_app::{RunOptions, run_pipeline};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

fn main() -> Result<()> {
    init_tracing();

    let mut options = RunOptions::default();
    if let Some(seconds) = env_f64("EVOSTREAM_RUN_SECONDS") {
        options.run_budget = Duration::from_secs_f64(seconds.max(0.1));
    }
    if let Some(seed) = env_u64("EVOSTREAM_SEED") {
        options.demo.seed = seed;
    }

    info!("starting evostream demo pipeline");
    let report = run_pipeline(options)?;
    info!(
        frames = report.frames,
        epochs = report.epochs,
        repaired = report.repaired,
        buffered_samples = report.buffered_samples,
        lineages = report.lineages,
        mutation_events = report.mutation_events,
        max_gap = report.max_gap,
        final_animation_time = report.final_animation_time,
        final_integration_time = report.final_integration_time,
        shutdown = report.shutdown,
        "demo pipeline finished"
    );

    if let Some(path) = std::env::var_os("EVOSTREAM_REPORT").map(PathBuf::from) {
        report.write_json(&path)?;
        info!(path = %path.display(), "run report written");
    }

    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok()?.trim().parse().ok()
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.trim().parse().ok()
}
