//! Synthetic community standing in for a real simulation backend.
//!
//! Logistic growth shared across a set of lineages, with random branching at
//! epoch boundaries so the lineage set grows over the run the way a real
//! eco-evolutionary model's would.

use evostream_bridge::{EpochProducer, ProducerBridge, ProducerError};
use evostream_core::{Epoch, LineageId};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Fraction of the parent's abundance seeded into a freshly branched
/// lineage.
const BRANCH_SEED_FRACTION: f64 = 0.05;

/// Parameters for the synthetic community.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// RNG seed for reproducible runs.
    pub seed: u64,
    /// Simulation time to integrate up to.
    pub total_time: f64,
    /// Integration step size.
    pub dt: f64,
    /// Steps batched into one published epoch.
    pub steps_per_epoch: usize,
    /// Probability that some lineage branches at an epoch boundary.
    pub branch_probability: f64,
    /// Per-lineage logistic growth rate.
    pub growth_rate: f64,
    /// Shared carrying capacity for total biomass.
    pub carrying_capacity: f64,
    /// Artificial pause after each epoch, to mimic a slow backend. Zero
    /// disables the pause.
    pub epoch_delay: Duration,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            seed: 0x5EED_CA11,
            total_time: 200.0,
            dt: 0.5,
            steps_per_epoch: 20,
            branch_probability: 0.3,
            growth_rate: 0.8,
            carrying_capacity: 100.0,
            epoch_delay: Duration::from_millis(5),
        }
    }
}

/// The producer itself: integrates the community forward and publishes one
/// epoch per batch of steps.
pub struct DemoCommunity {
    config: DemoConfig,
    rng: SmallRng,
    lineages: Vec<(LineageId, f64)>,
    next_lineage: usize,
    t: f64,
}

impl DemoCommunity {
    #[must_use]
    pub fn new(config: DemoConfig) -> Self {
        let rng = SmallRng::seed_from_u64(config.seed);
        let mut community = Self {
            config,
            rng,
            lineages: Vec::new(),
            next_lineage: 0,
            t: 0.0,
        };
        let founder = community.fresh_id();
        community.lineages.push((founder, 1.0));
        community
    }

    fn fresh_id(&mut self) -> LineageId {
        let id = LineageId::new(format!("L{}", self.next_lineage));
        self.next_lineage += 1;
        id
    }

    fn total_biomass(&self) -> f64 {
        self.lineages.iter().map(|(_, n)| n).sum()
    }

    /// One Euler step of shared-capacity logistic growth.
    fn step(&mut self) {
        let total = self.total_biomass();
        let pressure = 1.0 - total / self.config.carrying_capacity;
        for (_, abundance) in &mut self.lineages {
            *abundance += self.config.growth_rate * *abundance * pressure * self.config.dt;
            *abundance = abundance.max(0.0);
        }
        self.t += self.config.dt;
    }

    /// Maybe branch a random lineage, seeding the child from its parent.
    fn maybe_branch(&mut self) {
        if self.rng.random_range(0.0..1.0) >= self.config.branch_probability {
            return;
        }
        let parent = self.rng.random_range(0..self.lineages.len());
        let seed_abundance = (self.lineages[parent].1 * BRANCH_SEED_FRACTION).max(1e-6);
        self.lineages[parent].1 -= seed_abundance;
        let child = self.fresh_id();
        debug!(parent = %self.lineages[parent].0, child = %child, t = self.t, "lineage branched");
        self.lineages.push((child, seed_abundance));
    }

    /// Integrate one epoch and package it for the bridge.
    fn integrate_epoch(&mut self) -> Epoch {
        self.maybe_branch();

        let steps = self.config.steps_per_epoch;
        let mut times = Vec::with_capacity(steps);
        let mut scalars = Vec::with_capacity(steps);
        let mut rows: Vec<Vec<f64>> = vec![Vec::with_capacity(steps); self.lineages.len()];

        for _ in 0..steps {
            self.step();
            times.push(self.t);
            scalars.push(self.total_biomass());
            for (row, (_, abundance)) in rows.iter_mut().zip(&self.lineages) {
                row.push(*abundance);
            }
        }

        let ids = self.lineages.iter().map(|(id, _)| id.clone()).collect();
        Epoch::with_lineages(times, scalars, rows, ids)
    }
}

impl EpochProducer for DemoCommunity {
    fn run(&mut self, bridge: &ProducerBridge) -> Result<f64, ProducerError> {
        info!(
            total_time = self.config.total_time,
            dt = self.config.dt,
            seed = self.config.seed,
            "demo community starting"
        );
        while self.t < self.config.total_time {
            if bridge.stop_requested() {
                info!(t = self.t, "demo community stopping on request");
                return Ok(self.t);
            }
            let epoch = self.integrate_epoch();
            bridge.publish(epoch);
            if !self.config.epoch_delay.is_zero() {
                thread::sleep(self.config.epoch_delay);
            }
        }
        info!(
            final_time = self.t,
            lineages = self.lineages.len(),
            "demo community finished"
        );
        Ok(self.t)
    }
}
