//! Core playback engine shared across the evostream workspace.
//!
//! Decouples a slow, irregular producer timeline from a smooth fixed-rate
//! playback timeline: epochs of time-stamped samples land in sorted buffers,
//! queries interpolate between buffered samples, and a wall-clock driven
//! playback cursor advances under a buffer-health speed governor.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Speed factor applied when the buffer gap falls below the critical threshold.
const MIN_HEALTH_FACTOR: f64 = 0.1;

/// Stable identifier for a dynamically-appearing lineage.
///
/// Ids arrive as strings on the wire and are interned behind an `Arc` so the
/// per-slot maps can clone them cheaply.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LineageId(Arc<str>);

impl LineageId {
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LineageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for LineageId {
    fn from(id: String) -> Self {
        Self(Arc::from(id))
    }
}

impl fmt::Debug for LineageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LineageId({})", self.0)
    }
}

impl fmt::Display for LineageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors raised when validating playback configuration.
#[derive(Debug, Error, PartialEq)]
pub enum PlaybackError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Tunable playback parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybackConfig {
    /// Initial manual speed multiplier (1.0 = wall-clock rate).
    pub default_speed: f64,
    /// Buffer gap below which playback slows to the minimum factor.
    pub buffer_critical: f64,
    /// Buffer gap above which playback runs at full speed; the factor ramps
    /// linearly between the critical and low thresholds.
    pub buffer_low: f64,
    /// Lower bound accepted by [`PlaybackController::set_manual_speed`].
    pub min_speed: f64,
    /// Upper bound accepted by [`PlaybackController::set_manual_speed`].
    pub max_speed: f64,
    /// Emit per-sample diagnostics while merging lineage values.
    pub debug_interpolation: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_speed: 1.0,
            buffer_critical: 100.0,
            buffer_low: 1_000.0,
            min_speed: 0.1,
            max_speed: 10.0,
            debug_interpolation: false,
        }
    }
}

impl PlaybackConfig {
    /// Wide-range profile used by the suppression-style frontends.
    #[must_use]
    pub fn wide_profile() -> Self {
        Self {
            min_speed: 0.25,
            max_speed: 100.0,
            ..Self::default()
        }
    }

    /// Ensure thresholds and speed bounds are coherent.
    pub fn validate(&self) -> Result<(), PlaybackError> {
        if !self.buffer_critical.is_finite() || self.buffer_critical < 0.0 {
            return Err(PlaybackError::InvalidConfig(
                "buffer_critical must be finite and non-negative",
            ));
        }
        if !self.buffer_low.is_finite() || self.buffer_low <= self.buffer_critical {
            return Err(PlaybackError::InvalidConfig(
                "buffer_low must exceed buffer_critical",
            ));
        }
        if !(self.min_speed > 0.0) || !self.min_speed.is_finite() {
            return Err(PlaybackError::InvalidConfig("min_speed must be positive"));
        }
        if !self.max_speed.is_finite() || self.max_speed < self.min_speed {
            return Err(PlaybackError::InvalidConfig(
                "max_speed must be at least min_speed",
            ));
        }
        if !self.default_speed.is_finite()
            || self.default_speed < self.min_speed
            || self.default_speed > self.max_speed
        {
            return Err(PlaybackError::InvalidConfig(
                "default_speed must lie within [min_speed, max_speed]",
            ));
        }
        Ok(())
    }

    /// Speed factor for the given buffer gap: the minimum below the critical
    /// threshold, a linear ramp to 1.0 up to the low threshold, full speed
    /// beyond it.
    #[must_use]
    pub fn health_factor(&self, gap: f64) -> f64 {
        if gap < self.buffer_critical {
            MIN_HEALTH_FACTOR
        } else if gap < self.buffer_low {
            let proportion =
                (gap - self.buffer_critical) / (self.buffer_low - self.buffer_critical);
            MIN_HEALTH_FACTOR + (1.0 - MIN_HEALTH_FACTOR) * proportion
        } else {
            1.0
        }
    }

    /// Classify the gap against the same thresholds the governor uses.
    #[must_use]
    pub fn classify(&self, gap: f64) -> BufferHealth {
        if gap >= self.buffer_low {
            BufferHealth::Healthy
        } else if gap >= self.buffer_critical {
            BufferHealth::Low
        } else {
            BufferHealth::Critical
        }
    }
}

/// Mapping from an integer UI slider position to a speed multiplier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliderCurve {
    /// 1..=100 mapped onto 0.1x–10x.
    Classic,
    /// -60..=80 mapped onto 0.25x–100x.
    Wide,
}

impl SliderCurve {
    /// Valid slider positions for this curve.
    #[must_use]
    pub fn range(&self) -> RangeInclusive<i32> {
        match self {
            Self::Classic => 1..=100,
            Self::Wide => -60..=80,
        }
    }

    /// Convert a slider position into a clamped speed multiplier using a
    /// logarithmic curve.
    #[must_use]
    pub fn speed(&self, value: i32) -> f64 {
        match self {
            Self::Classic => {
                let value = value.clamp(1, 100);
                let speed = 0.1 * 10f64.powf(f64::from(value - 1) / 99.0 * 2.0);
                speed.clamp(0.1, 10.0)
            }
            Self::Wide => {
                let value = value.clamp(-60, 80);
                let speed = 10f64.powf(f64::from(value) / 40.0);
                speed.clamp(0.25, 100.0)
            }
        }
    }
}

/// One atomic batch of newly computed samples delivered across the bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epoch {
    /// Simulation times covered by this batch.
    pub times: Vec<f64>,
    /// Scalar series values (e.g. total biomass), aligned to `times`.
    pub scalars: Vec<f64>,
    /// Optional per-lineage value matrix; row `r` belongs to
    /// `lineage_ids[r]`, column `i` to `times[i]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage_values: Option<Vec<Vec<f64>>>,
    /// Lineage ids aligned to the first axis of `lineage_values`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage_ids: Option<Vec<LineageId>>,
}

impl Epoch {
    /// Batch carrying only the scalar series.
    #[must_use]
    pub fn scalar_only(times: Vec<f64>, scalars: Vec<f64>) -> Self {
        Self {
            times,
            scalars,
            lineage_values: None,
            lineage_ids: None,
        }
    }

    /// Batch carrying the scalar series plus a lineage value matrix.
    #[must_use]
    pub fn with_lineages(
        times: Vec<f64>,
        scalars: Vec<f64>,
        lineage_values: Vec<Vec<f64>>,
        lineage_ids: Vec<LineageId>,
    ) -> Self {
        Self {
            times,
            scalars,
            lineage_values: Some(lineage_values),
            lineage_ids: Some(lineage_ids),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Normalize the batch in place so downstream consumers can assume a
    /// coherent shape: parallel sequences share a length, rows match ids,
    /// times are finite, strictly increasing, and unique.
    ///
    /// Malformed input is repaired rather than rejected; the returned record
    /// says which repairs were applied so the boundary can log them once.
    pub fn sanitize(&mut self) -> EpochRepairs {
        let mut repairs = EpochRepairs::default();

        // Parallel scalar sequences must share a length.
        if self.times.len() != self.scalars.len() {
            let min_len = self.times.len().min(self.scalars.len());
            self.times.truncate(min_len);
            self.scalars.truncate(min_len);
            repairs.truncated = true;
        }

        // Row count must match the id count; values without an id (or the
        // reverse) carry no usable identity.
        if let (Some(values), Some(ids)) = (&mut self.lineage_values, &mut self.lineage_ids) {
            if values.len() != ids.len() {
                let min_rows = values.len().min(ids.len());
                values.truncate(min_rows);
                ids.truncate(min_rows);
                repairs.rows_truncated = true;
            }
            // Pad or trim each row to the time axis; a short row repeats its
            // last sample, an empty row contributes zeros.
            let width = self.times.len();
            for row in values.iter_mut() {
                if row.len() > width {
                    row.truncate(width);
                } else if row.len() < width {
                    let fill = row.last().copied().unwrap_or(0.0);
                    row.resize(width, fill);
                }
            }
        } else if self.lineage_values.is_some() != self.lineage_ids.is_some() {
            // One half of the lineage payload is useless without the other.
            self.lineage_values = None;
            self.lineage_ids = None;
            repairs.rows_truncated = true;
        }

        // Drop samples with non-finite time or scalar, keeping the matrix
        // columns aligned.
        if self
            .times
            .iter()
            .zip(&self.scalars)
            .any(|(t, v)| !t.is_finite() || !v.is_finite())
        {
            let keep: Vec<bool> = self
                .times
                .iter()
                .zip(&self.scalars)
                .map(|(t, v)| t.is_finite() && v.is_finite())
                .collect();
            retain_by_mask(&mut self.times, &keep);
            retain_by_mask(&mut self.scalars, &keep);
            if let Some(values) = &mut self.lineage_values {
                for row in values.iter_mut() {
                    retain_by_mask(row, &keep);
                }
            }
            repairs.dropped_non_finite = true;
        }

        // Restore time ordering if the producer emitted out of order.
        if self.times.windows(2).any(|pair| pair[0] >= pair[1]) {
            let mut order: Vec<usize> = (0..self.times.len()).collect();
            order.sort_by(|&a, &b| {
                self.times[a]
                    .partial_cmp(&self.times[b])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            if order.windows(2).any(|pair| pair[0] > pair[1]) {
                permute(&mut self.times, &order);
                permute(&mut self.scalars, &order);
                if let Some(values) = &mut self.lineage_values {
                    for row in values.iter_mut() {
                        permute(row, &order);
                    }
                }
                repairs.sorted = true;
            }

            // Collapse duplicate times, keeping the first occurrence.
            let mut keep = Vec::with_capacity(self.times.len());
            let mut last: Option<f64> = None;
            for &t in &self.times {
                let duplicate = last.is_some_and(|prev| prev == t);
                keep.push(!duplicate);
                if !duplicate {
                    last = Some(t);
                }
            }
            if keep.iter().any(|flag| !flag) {
                retain_by_mask(&mut self.times, &keep);
                retain_by_mask(&mut self.scalars, &keep);
                if let Some(values) = &mut self.lineage_values {
                    for row in values.iter_mut() {
                        retain_by_mask(row, &keep);
                    }
                }
                repairs.deduped = true;
            }
        }

        repairs
    }
}

fn retain_by_mask<T>(items: &mut Vec<T>, keep: &[bool]) {
    let mut index = 0;
    items.retain(|_| {
        let flag = keep.get(index).copied().unwrap_or(false);
        index += 1;
        flag
    });
}

fn permute<T: Copy>(items: &mut [T], order: &[usize]) {
    let reordered: Vec<T> = order.iter().map(|&i| items[i]).collect();
    items.copy_from_slice(&reordered);
}

/// Record of which repairs [`Epoch::sanitize`] applied.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EpochRepairs {
    /// Times and scalars were truncated to a common length.
    pub truncated: bool,
    /// Lineage rows/ids were truncated to a common count, or an incomplete
    /// lineage payload was discarded.
    pub rows_truncated: bool,
    /// Samples with non-finite time or value were dropped.
    pub dropped_non_finite: bool,
    /// Times were re-sorted into increasing order.
    pub sorted: bool,
    /// Duplicate times were collapsed.
    pub deduped: bool,
}

impl EpochRepairs {
    #[must_use]
    pub fn any(&self) -> bool {
        self.truncated
            || self.rows_truncated
            || self.dropped_non_finite
            || self.sorted
            || self.deduped
    }
}

impl fmt::Display for EpochRepairs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut actions: Vec<&str> = Vec::new();
        if self.truncated {
            actions.push("truncated");
        }
        if self.rows_truncated {
            actions.push("rows_truncated");
        }
        if self.dropped_non_finite {
            actions.push("dropped_non_finite");
        }
        if self.sorted {
            actions.push("sorted");
        }
        if self.deduped {
            actions.push("deduped");
        }
        if actions.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&actions.join(","))
        }
    }
}

/// Sorted, deduplicated scalar series indexed by simulation time.
#[derive(Debug, Default, Clone)]
pub struct SeriesBuffer {
    times: Vec<f64>,
    values: Vec<f64>,
}

impl SeriesBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    #[must_use]
    pub fn first_time(&self) -> Option<f64> {
        self.times.first().copied()
    }

    #[must_use]
    pub fn last_time(&self) -> Option<f64> {
        self.times.last().copied()
    }

    /// Insert `(t, v)` at its sorted position. Returns the insertion index,
    /// or `None` when the time is already buffered (idempotent) or not
    /// finite.
    pub fn insert(&mut self, t: f64, v: f64) -> Option<usize> {
        if !t.is_finite() {
            return None;
        }
        let index = self.times.partition_point(|&buffered| buffered < t);
        if self.times.get(index).copied() == Some(t) {
            return None;
        }
        self.times.insert(index, t);
        self.values.insert(index, v);
        Some(index)
    }

    /// Exact index of a buffered time, if present.
    #[must_use]
    pub fn position(&self, t: f64) -> Option<usize> {
        let index = self.times.partition_point(|&buffered| buffered < t);
        (self.times.get(index).copied() == Some(t)).then_some(index)
    }

    /// Linearly interpolated value at `t`: zero on an empty buffer, clamped
    /// to the first/last sample outside the buffered span.
    #[must_use]
    pub fn sample(&self, t: f64) -> f64 {
        if self.times.is_empty() {
            return 0.0;
        }
        if t <= self.times[0] {
            return self.values[0];
        }
        let last = self.times.len() - 1;
        if t >= self.times[last] {
            return self.values[last];
        }
        let upper = self.times.partition_point(|&buffered| buffered < t);
        let (t0, t1) = (self.times[upper - 1], self.times[upper]);
        let (v0, v1) = (self.values[upper - 1], self.values[upper]);
        if t1 == t0 {
            return v0;
        }
        let alpha = (t - t0) / (t1 - t0);
        v0 + alpha * (v1 - v0)
    }

    /// Bracketing indices around `t`, for callers interpolating side data
    /// aligned to this buffer. `None` when the buffer is empty; equal
    /// indices when `t` clamps to an endpoint.
    #[must_use]
    pub fn bracket(&self, t: f64) -> Option<(usize, usize, f64)> {
        if self.times.is_empty() {
            return None;
        }
        if t <= self.times[0] {
            return Some((0, 0, 0.0));
        }
        let last = self.times.len() - 1;
        if t >= self.times[last] {
            return Some((last, last, 0.0));
        }
        let upper = self.times.partition_point(|&buffered| buffered < t);
        let (t0, t1) = (self.times[upper - 1], self.times[upper]);
        let alpha = if t1 > t0 { (t - t0) / (t1 - t0) } else { 0.0 };
        Some((upper - 1, upper, alpha))
    }

    pub fn clear(&mut self) {
        self.times.clear();
        self.values.clear();
    }
}

/// Append-only mapping from lineage id to the ordinal of its first
/// appearance. Ordinals are never reused or reassigned, giving downstream
/// consumers (legends, color tables) a stable identity per lineage.
#[derive(Debug, Default, Clone)]
pub struct LineageRegistry {
    ordinals: HashMap<LineageId, usize>,
    order: Vec<LineageId>,
}

impl LineageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation of `id`, assigning the next ordinal on first
    /// sight. Returns the lineage's stable ordinal.
    pub fn observe(&mut self, id: &LineageId) -> usize {
        if let Some(&ordinal) = self.ordinals.get(id) {
            return ordinal;
        }
        let ordinal = self.order.len();
        self.ordinals.insert(id.clone(), ordinal);
        self.order.push(id.clone());
        ordinal
    }

    #[must_use]
    pub fn ordinal(&self, id: &LineageId) -> Option<usize> {
        self.ordinals.get(id).copied()
    }

    #[must_use]
    pub fn contains(&self, id: &LineageId) -> bool {
        self.ordinals.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Lineages in first-appearance order.
    pub fn iter(&self) -> impl Iterator<Item = &LineageId> {
        self.order.iter()
    }

    pub fn clear(&mut self) {
        self.ordinals.clear();
        self.order.clear();
    }
}

/// Append-only log of times at which the active lineage count grew.
#[derive(Debug, Default, Clone)]
pub struct MutationLog {
    times: Vec<f64>,
}

impl MutationLog {
    pub fn record(&mut self, t: f64) {
        self.times.push(t);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    #[must_use]
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Logged timestamps within `[t0, t1]` inclusive, in insertion order.
    #[must_use]
    pub fn events_in_range(&self, t0: f64, t1: f64) -> Vec<f64> {
        self.times
            .iter()
            .copied()
            .filter(|&t| t >= t0 && t <= t1)
            .collect()
    }

    pub fn clear(&mut self) {
        self.times.clear();
    }
}

/// Whether the effective speed follows the manual multiplier or tracks the
/// buffer-health factor alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedMode {
    Manual,
    Automatic,
}

/// Coarse classification of the buffer gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BufferHealth {
    Healthy,
    Low,
    Critical,
}

/// Snapshot of buffer health reported to frontends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BufferStatus {
    /// `integration_time - animation_time`.
    pub gap: f64,
    /// Number of buffered samples.
    pub len: usize,
    /// Health factor currently applied by the governor.
    pub speed_factor: f64,
    pub health: BufferHealth,
}

/// One playback frame: the animation cursor and the scalar value there.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub time: f64,
    pub scalar: f64,
}

/// Streaming playback controller.
///
/// Owns the buffers on the consumer side: epochs go in through [`feed`],
/// frames come out through [`poll_frame`]. The animation cursor only ever
/// advances, and never past the latest buffered time.
///
/// [`feed`]: PlaybackController::feed
/// [`poll_frame`]: PlaybackController::poll_frame
#[derive(Debug, Clone)]
pub struct PlaybackController {
    config: PlaybackConfig,
    series: SeriesBuffer,
    lineage_slots: Vec<HashMap<LineageId, f64>>,
    registry: LineageRegistry,
    mutations: MutationLog,
    active_lineages: Option<usize>,
    animation_time: f64,
    integration_time: f64,
    playing: bool,
    manual_speed: f64,
    mode: SpeedMode,
}

impl PlaybackController {
    pub fn new(config: PlaybackConfig) -> Result<Self, PlaybackError> {
        config.validate()?;
        let manual_speed = config.default_speed;
        Ok(Self {
            config,
            series: SeriesBuffer::new(),
            lineage_slots: Vec::new(),
            registry: LineageRegistry::new(),
            mutations: MutationLog::default(),
            active_lineages: None,
            animation_time: 0.0,
            integration_time: 0.0,
            playing: true,
            manual_speed,
            mode: SpeedMode::Manual,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Absorb one epoch into the buffers.
    ///
    /// Scalar samples insert in sorted order (duplicates are no-ops), each
    /// insertion mirrored by an empty lineage slot to keep the two
    /// structures index-aligned. Lineage values then merge into the slots of
    /// their exact times. Malformed shapes degrade sample-by-sample; nothing
    /// here fails the whole epoch.
    pub fn feed(&mut self, epoch: &Epoch) {
        let pair_count = epoch.times.len().min(epoch.scalars.len());
        if epoch.times.len() != epoch.scalars.len() {
            warn!(
                times = epoch.times.len(),
                scalars = epoch.scalars.len(),
                kept = pair_count,
                "epoch length mismatch; truncating to shorter length"
            );
        }

        for i in 0..pair_count {
            if let Some(index) = self.series.insert(epoch.times[i], epoch.scalars[i]) {
                self.lineage_slots.insert(index, HashMap::new());
            }
        }
        if let Some(last) = self.series.last_time() {
            self.integration_time = last;
        }

        if let (Some(values), Some(ids)) = (&epoch.lineage_values, &epoch.lineage_ids) {
            self.merge_lineages(&epoch.times[..pair_count], values, ids);
        }

        debug!(
            buffered = self.series.len(),
            integration_time = self.integration_time,
            lineages = self.registry.len(),
            "epoch absorbed"
        );
    }

    fn merge_lineages(&mut self, times: &[f64], values: &[Vec<f64>], ids: &[LineageId]) {
        let row_count = values.len().min(ids.len());
        if values.len() != ids.len() {
            warn!(
                rows = values.len(),
                ids = ids.len(),
                kept = row_count,
                "lineage row count does not match id count; truncating"
            );
        }
        let ids = &ids[..row_count];
        let values = &values[..row_count];

        // Growth detection compares this epoch's id-set cardinality against
        // the previous epoch's; the first epoch only establishes the
        // baseline. The registry is the cross-epoch superset and keeps
        // ordinals stable.
        for id in ids {
            self.registry.observe(id);
        }
        if let Some(previous) = self.active_lineages
            && ids.len() > previous
            && let Some(&event_time) = times.last()
        {
            self.mutations.record(event_time);
            debug!(
                event_time,
                new_lineages = ids.len() - previous,
                "lineage count grew; mutation event recorded"
            );
        }
        self.active_lineages = Some(ids.len());

        for (i, &t) in times.iter().enumerate() {
            let Some(slot_index) = self.series.position(t) else {
                // Ordering bug upstream; drop this sample, keep the batch.
                warn!(time = t, "lineage sample references unbuffered time; skipping");
                continue;
            };
            let slot = &mut self.lineage_slots[slot_index];
            for (row, id) in values.iter().zip(ids) {
                // A short row repeats its final sample rather than failing.
                let value = row.get(i).or_else(|| row.last()).copied().unwrap_or(0.0);
                if self.config.debug_interpolation {
                    debug!(lineage = %id, time = t, value, "merging lineage sample");
                }
                slot.insert(id.clone(), value);
            }
        }
    }

    /// Advance the animation cursor by `delta_seconds` of wall time and
    /// return the frame there, or `None` while paused or before any data
    /// has arrived.
    pub fn poll_frame(&mut self, delta_seconds: f64) -> Option<Frame> {
        if !self.playing || self.series.is_empty() {
            return None;
        }
        let gap = self.integration_time - self.animation_time;
        let factor = self.config.health_factor(gap);
        let multiplier = match self.mode {
            SpeedMode::Manual => self.manual_speed,
            SpeedMode::Automatic => 1.0,
        };
        self.animation_time += delta_seconds.max(0.0) * multiplier * factor;
        if self.animation_time > self.integration_time {
            self.animation_time = self.integration_time;
        }
        Some(Frame {
            time: self.animation_time,
            scalar: self.series.sample(self.animation_time),
        })
    }

    /// Interpolated scalar value at an arbitrary query time.
    #[must_use]
    pub fn interp_scalar(&self, t: f64) -> f64 {
        self.series.sample(t)
    }

    /// Interpolated per-lineage values at an arbitrary query time.
    ///
    /// Between two buffered samples the result covers the union of lineages
    /// present on either side; a lineage absent on one side interpolates
    /// from zero, so newly appeared lineages ramp in smoothly.
    #[must_use]
    pub fn interp_lineages(&self, t: f64) -> HashMap<LineageId, f64> {
        let Some((lower, upper, alpha)) = self.series.bracket(t) else {
            return HashMap::new();
        };
        if lower == upper {
            return self.lineage_slots[lower].clone();
        }
        let before = &self.lineage_slots[lower];
        let after = &self.lineage_slots[upper];
        let union: HashSet<&LineageId> = before.keys().chain(after.keys()).collect();
        let mut interpolated = HashMap::with_capacity(union.len());
        for id in union {
            let v0 = before.get(id).copied().unwrap_or(0.0);
            let v1 = after.get(id).copied().unwrap_or(0.0);
            interpolated.insert(id.clone(), v0 + alpha * (v1 - v0));
        }
        interpolated
    }

    #[must_use]
    pub fn buffer_status(&self) -> BufferStatus {
        let gap = self.integration_time - self.animation_time;
        BufferStatus {
            gap,
            len: self.series.len(),
            speed_factor: self.config.health_factor(gap),
            health: self.config.classify(gap),
        }
    }

    /// Multiplier actually applied this tick: the health factor alone in
    /// automatic mode, scaled by the manual speed otherwise.
    #[must_use]
    pub fn effective_speed(&self) -> f64 {
        let gap = self.integration_time - self.animation_time;
        let factor = self.config.health_factor(gap);
        match self.mode {
            SpeedMode::Manual => self.manual_speed * factor,
            SpeedMode::Automatic => factor,
        }
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Set the manual multiplier, clamped to the configured bounds.
    pub fn set_manual_speed(&mut self, speed: f64) {
        self.manual_speed = speed.clamp(self.config.min_speed, self.config.max_speed);
    }

    #[must_use]
    pub fn manual_speed(&self) -> f64 {
        self.manual_speed
    }

    pub fn enable_auto_speed(&mut self) {
        self.mode = SpeedMode::Automatic;
    }

    pub fn disable_auto_speed(&mut self) {
        self.mode = SpeedMode::Manual;
    }

    #[must_use]
    pub fn speed_mode(&self) -> SpeedMode {
        self.mode
    }

    #[must_use]
    pub fn animation_time(&self) -> f64 {
        self.animation_time
    }

    #[must_use]
    pub fn integration_time(&self) -> f64 {
        self.integration_time
    }

    #[must_use]
    pub fn registry(&self) -> &LineageRegistry {
        &self.registry
    }

    #[must_use]
    pub fn mutation_log(&self) -> &MutationLog {
        &self.mutations
    }

    /// Mutation events within `[t0, t1]` inclusive.
    #[must_use]
    pub fn events_in_range(&self, t0: f64, t1: f64) -> Vec<f64> {
        self.mutations.events_in_range(t0, t1)
    }

    /// Drop all buffered data and rewind both clocks for a fresh run.
    /// Speed settings survive the reset.
    pub fn reset(&mut self) {
        self.series.clear();
        self.lineage_slots.clear();
        self.registry.clear();
        self.mutations.clear();
        self.active_lineages = None;
        self.animation_time = 0.0;
        self.integration_time = 0.0;
        self.playing = true;
    }
}
