//! Summary of one demo pipeline run.

use anyhow::{Context, Result};
use evostream_bridge::RunStatus;
use serde::Serialize;
use std::fs::File;
use std::path::Path;

/// Aggregate of everything the consumer loop observed.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Frames emitted by the playback controller.
    pub frames: usize,
    /// Epochs drained off the bridge.
    pub epochs: usize,
    /// Epochs that needed boundary repairs.
    pub repaired: usize,
    /// Samples buffered at the end of the run.
    pub buffered_samples: usize,
    /// Lineages registered over the run.
    pub lineages: usize,
    /// Mutation events detected over the run.
    pub mutation_events: usize,
    /// Largest buffer gap observed across frame ticks.
    pub max_gap: f64,
    pub final_animation_time: f64,
    pub final_integration_time: f64,
    /// Terminal status from the producer, if one arrived in time.
    pub status: Option<RunStatus>,
    /// How the producer thread wound down: "joined" or "abandoned".
    pub shutdown: &'static str,
}

impl RunReport {
    /// Write the report as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create report file {}", path.display()))?;
        serde_json::to_writer_pretty(file, self).context("failed to serialize run report")?;
        Ok(())
    }
}
