//! Bridge between a background producer and the playback consumer.
//!
//! The producer runs on its own thread and pushes messages into a bounded
//! channel, blocking up to a timeout when the channel is full and dropping
//! the message afterwards; that timeout is the single backpressure valve in
//! the system. The consumer drains whatever is queued without ever blocking
//! its own tick schedule.

use crossfire::{MRx, MTx, SendTimeoutError, TryRecvError, TrySendError, detect_backoff_cfg, mpmc};
use evostream_core::{Epoch, PlaybackController};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Default bound on queued messages, limiting memory growth when the
/// consumer falls behind.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Default time a producer waits on a full channel before dropping an epoch.
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Terminal status messages get a longer push budget; losing one hides the
/// outcome of the whole run, losing an epoch only thins the data.
const STATUS_PUSH_TIMEOUT: Duration = Duration::from_secs(2);

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Terminal outcome of a producer run, sent exactly once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunStatus {
    Completed { final_time: f64 },
    Error { detail: String },
}

/// Everything a producer can put on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Data(Epoch),
    Status(RunStatus),
}

/// Unrecoverable producer failure, relayed to the consumer as a single
/// [`RunStatus::Error`].
#[derive(Debug, Error, PartialEq)]
#[error("{detail}")]
pub struct ProducerError {
    pub detail: String,
}

impl ProducerError {
    #[must_use]
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

pub type BridgeTx = MTx<WorkerMessage>;
pub type BridgeRx = MRx<WorkerMessage>;

/// Create the bounded bridge channel.
pub fn create_epoch_bus(capacity: usize) -> (BridgeTx, BridgeRx) {
    detect_backoff_cfg();
    mpmc::bounded_blocking(capacity)
}

/// Producer-side endpoint: the channel sender plus the cooperative stop
/// flag, handed to [`EpochProducer::run`].
pub struct ProducerBridge {
    tx: BridgeTx,
    stop: Arc<AtomicBool>,
    push_timeout: Duration,
}

impl ProducerBridge {
    /// Push one epoch, blocking up to the configured timeout when the
    /// channel is full. Returns `false` when the epoch was dropped; dropped
    /// epochs are acceptable data loss under backpressure, not an error.
    pub fn publish(&self, epoch: Epoch) -> bool {
        match self.tx.send_timeout(WorkerMessage::Data(epoch), self.push_timeout) {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(
                    timeout_ms = self.push_timeout.as_millis() as u64,
                    "bridge channel full; epoch dropped"
                );
                false
            }
            Err(SendTimeoutError::Disconnected(_)) => {
                debug!("bridge receiver disconnected; epoch dropped");
                false
            }
        }
    }

    /// Push one epoch without blocking at all.
    pub fn try_publish(&self, epoch: Epoch) -> bool {
        match self.tx.try_send(WorkerMessage::Data(epoch)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Whether the consumer has asked this producer to halt.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn publish_status(&self, status: RunStatus) -> bool {
        match self
            .tx
            .send_timeout(WorkerMessage::Status(status), STATUS_PUSH_TIMEOUT)
        {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Disconnected(_)) => false,
        }
    }
}

/// A background computation that streams epochs across the bridge.
///
/// Implementations should poll [`ProducerBridge::stop_requested`] at epoch
/// granularity and return promptly once it flips. Returning `Ok` yields a
/// `completed` status carrying the final simulation time; returning `Err`
/// yields an `error` status. The runner emits exactly one of the two.
pub trait EpochProducer: Send + 'static {
    fn run(&mut self, bridge: &ProducerBridge) -> Result<f64, ProducerError>;
}

/// Outcome of [`ProducerHandle::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The producer halted within the grace period and was joined.
    Joined,
    /// The producer ignored the stop signal; its handle was abandoned. The
    /// disconnected channel guarantees it can no longer reach the buffers.
    Abandoned,
}

/// Owner of a spawned producer thread.
pub struct ProducerHandle {
    join: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl ProducerHandle {
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Signal the producer to halt without waiting for it.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Signal the producer and wait up to `grace` for it to finish. A
    /// producer still running after the grace period is abandoned rather
    /// than blocked on.
    pub fn stop(&mut self, grace: Duration) -> StopOutcome {
        self.request_stop();
        let Some(handle) = self.join.take() else {
            return StopOutcome::Joined;
        };

        let deadline = Instant::now() + grace;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    grace_ms = grace.as_millis() as u64,
                    "producer ignored stop signal; abandoning thread"
                );
                return StopOutcome::Abandoned;
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        if handle.join().is_err() {
            error!("producer thread panicked");
        }
        StopOutcome::Joined
    }
}

impl Drop for ProducerHandle {
    fn drop(&mut self) {
        self.request_stop();
    }
}

/// Spawn `producer` on its own thread and return the handle plus the
/// consumer end of the bridge.
pub fn spawn_producer<P: EpochProducer>(
    mut producer: P,
    capacity: usize,
    push_timeout: Duration,
) -> (ProducerHandle, BridgeRx) {
    let (tx, rx) = create_epoch_bus(capacity);
    let stop = Arc::new(AtomicBool::new(false));
    let bridge = ProducerBridge {
        tx,
        stop: Arc::clone(&stop),
        push_timeout,
    };

    let join = thread::Builder::new()
        .name("evostream-producer".into())
        .spawn(move || {
            let status = match producer.run(&bridge) {
                Ok(final_time) => {
                    info!(final_time, "producer run completed");
                    RunStatus::Completed { final_time }
                }
                Err(err) => {
                    error!(detail = %err, "producer run failed");
                    RunStatus::Error {
                        detail: err.to_string(),
                    }
                }
            };
            if !bridge.publish_status(status) {
                warn!("terminal status message could not be delivered");
            }
        })
        .expect("failed to spawn producer thread");

    (
        ProducerHandle {
            join: Some(join),
            stop,
        },
        rx,
    )
}

/// What one non-blocking drain pass observed.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DrainReport {
    /// Epochs fed into the controller.
    pub epochs: usize,
    /// Epochs that needed boundary repairs before feeding.
    pub repaired: usize,
    /// Terminal status, if one was queued.
    pub status: Option<RunStatus>,
    /// The producer side hung up and nothing further will arrive.
    pub disconnected: bool,
}

/// Drain every currently queued message into the controller without
/// blocking. Epochs are sanitized once here, at the boundary, so the
/// buffers downstream can trust their shape.
pub fn drain_pending(receiver: &BridgeRx, controller: &mut PlaybackController) -> DrainReport {
    let mut report = DrainReport::default();
    loop {
        match receiver.try_recv() {
            Ok(WorkerMessage::Data(mut epoch)) => {
                let repairs = epoch.sanitize();
                if repairs.any() {
                    warn!(%repairs, "epoch repaired at bridge boundary");
                    report.repaired += 1;
                }
                controller.feed(&epoch);
                report.epochs += 1;
            }
            Ok(WorkerMessage::Status(status)) => {
                match &status {
                    RunStatus::Completed { final_time } => {
                        info!(final_time = *final_time, "run completed")
                    }
                    RunStatus::Error { detail } => error!(detail = %detail, "run failed"),
                }
                report.status = Some(status);
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                report.disconnected = true;
                break;
            }
        }
    }
    if report.epochs > 0 {
        debug!(epochs = report.epochs, repaired = report.repaired, "drained bridge");
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use evostream_core::PlaybackConfig;

    fn controller() -> PlaybackController {
        PlaybackController::new(PlaybackConfig::default()).expect("config")
    }

    fn ramp_epoch(start: usize, count: usize) -> Epoch {
        let times: Vec<f64> = (start..start + count).map(|i| i as f64).collect();
        let scalars = times.clone();
        Epoch::scalar_only(times, scalars)
    }

    /// Drain in a loop until a terminal status shows up or the deadline
    /// passes.
    fn drain_until_status(
        rx: &BridgeRx,
        controller: &mut PlaybackController,
        deadline: Duration,
    ) -> DrainReport {
        let start = Instant::now();
        let mut combined = DrainReport::default();
        while start.elapsed() < deadline {
            let pass = drain_pending(rx, controller);
            combined.epochs += pass.epochs;
            combined.repaired += pass.repaired;
            combined.disconnected |= pass.disconnected;
            if pass.status.is_some() {
                combined.status = pass.status;
                break;
            }
            if combined.disconnected {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        combined
    }

    struct ScriptedProducer {
        epochs: Vec<Epoch>,
        final_time: f64,
    }

    impl EpochProducer for ScriptedProducer {
        fn run(&mut self, bridge: &ProducerBridge) -> Result<f64, ProducerError> {
            for epoch in self.epochs.drain(..) {
                if bridge.stop_requested() {
                    break;
                }
                bridge.publish(epoch);
            }
            Ok(self.final_time)
        }
    }

    struct FailingProducer;

    impl EpochProducer for FailingProducer {
        fn run(&mut self, bridge: &ProducerBridge) -> Result<f64, ProducerError> {
            bridge.publish(ramp_epoch(0, 4));
            Err(ProducerError::new("integration diverged"))
        }
    }

    #[test]
    fn completed_status_is_delivered_exactly_once() {
        let producer = ScriptedProducer {
            epochs: vec![ramp_epoch(0, 10), ramp_epoch(10, 10), ramp_epoch(20, 10)],
            final_time: 29.0,
        };
        let (mut handle, rx) = spawn_producer(producer, DEFAULT_CHANNEL_CAPACITY, DEFAULT_PUSH_TIMEOUT);

        let mut controller = controller();
        let report = drain_until_status(&rx, &mut controller, Duration::from_secs(5));
        assert_eq!(report.epochs, 3);
        assert_eq!(report.status, Some(RunStatus::Completed { final_time: 29.0 }));
        assert_eq!(controller.integration_time(), 29.0);
        assert_eq!(controller.buffer_status().len, 30);

        // Nothing else arrives after the terminal status.
        assert_eq!(handle.stop(Duration::from_secs(1)), StopOutcome::Joined);
        let after = drain_pending(&rx, &mut controller);
        assert_eq!(after.epochs, 0);
        assert_eq!(after.status, None);
        assert!(after.disconnected);
    }

    #[test]
    fn producer_failure_surfaces_as_error_status_with_buffers_intact() {
        let (mut handle, rx) = spawn_producer(
            FailingProducer,
            DEFAULT_CHANNEL_CAPACITY,
            DEFAULT_PUSH_TIMEOUT,
        );

        let mut controller = controller();
        let report = drain_until_status(&rx, &mut controller, Duration::from_secs(5));
        assert_eq!(report.epochs, 1);
        assert_eq!(
            report.status,
            Some(RunStatus::Error {
                detail: "integration diverged".into()
            })
        );
        // Data received before the failure stays inspectable.
        assert_eq!(controller.buffer_status().len, 4);
        assert_eq!(handle.stop(Duration::from_secs(1)), StopOutcome::Joined);
    }

    #[test]
    fn full_channel_drops_epochs_after_timeout() {
        let (tx, rx) = create_epoch_bus(2);
        let bridge = ProducerBridge {
            tx,
            stop: Arc::new(AtomicBool::new(false)),
            push_timeout: Duration::from_millis(20),
        };

        assert!(bridge.publish(ramp_epoch(0, 5)));
        assert!(bridge.publish(ramp_epoch(5, 5)));
        // Channel is full and nobody is draining; this one must be dropped
        // after the bounded wait instead of hanging the producer.
        let started = Instant::now();
        assert!(!bridge.publish(ramp_epoch(10, 5)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!bridge.try_publish(ramp_epoch(10, 5)));

        // Whatever survived still satisfies the buffer invariants.
        let mut controller = controller();
        let report = drain_pending(&rx, &mut controller);
        assert_eq!(report.epochs, 2);
        assert_eq!(controller.buffer_status().len, 10);
        let times = (0..10).map(|i| i as f64).collect::<Vec<_>>();
        for t in &times {
            assert_eq!(controller.interp_scalar(*t), *t);
        }
    }

    #[test]
    fn malformed_epochs_are_repaired_at_the_boundary() {
        let (tx, rx) = create_epoch_bus(4);
        tx.try_send(WorkerMessage::Data(Epoch::scalar_only(
            vec![1.0, 0.0, f64::NAN, 1.0],
            vec![10.0, 0.0, 3.0],
        )))
        .expect("queued");

        let mut controller = controller();
        let report = drain_pending(&rx, &mut controller);
        assert_eq!(report.epochs, 1);
        assert_eq!(report.repaired, 1);
        assert_eq!(controller.buffer_status().len, 2);
        assert_eq!(controller.interp_scalar(0.0), 0.0);
        assert_eq!(controller.interp_scalar(1.0), 10.0);
    }

    struct CooperativeProducer;

    impl EpochProducer for CooperativeProducer {
        fn run(&mut self, bridge: &ProducerBridge) -> Result<f64, ProducerError> {
            let mut t = 0.0;
            while !bridge.stop_requested() {
                bridge.try_publish(Epoch::scalar_only(vec![t], vec![t]));
                t += 1.0;
                thread::sleep(Duration::from_millis(2));
            }
            Ok(t)
        }
    }

    struct StubbornProducer;

    impl EpochProducer for StubbornProducer {
        fn run(&mut self, _bridge: &ProducerBridge) -> Result<f64, ProducerError> {
            thread::sleep(Duration::from_millis(400));
            Ok(0.0)
        }
    }

    #[test]
    fn cooperative_producer_joins_within_grace() {
        let (mut handle, rx) =
            spawn_producer(CooperativeProducer, DEFAULT_CHANNEL_CAPACITY, DEFAULT_PUSH_TIMEOUT);
        thread::sleep(Duration::from_millis(20));
        assert!(handle.is_running());
        assert_eq!(handle.stop(Duration::from_secs(2)), StopOutcome::Joined);
        assert!(!handle.is_running());

        // Epochs queued before the stop may still be drained and applied.
        let mut controller = controller();
        let report = drain_pending(&rx, &mut controller);
        assert!(report.epochs > 0);
        assert!(report.status.is_some());
    }

    #[test]
    fn stubborn_producer_is_abandoned_after_grace() {
        let (mut handle, _rx) =
            spawn_producer(StubbornProducer, DEFAULT_CHANNEL_CAPACITY, DEFAULT_PUSH_TIMEOUT);
        assert_eq!(handle.stop(Duration::from_millis(30)), StopOutcome::Abandoned);
    }

    #[test]
    fn wire_schema_matches_the_documented_shape() {
        let status = WorkerMessage::Status(RunStatus::Completed { final_time: 42.0 });
        let json = serde_json::to_value(&status).expect("serialize");
        assert_eq!(json["type"], "status");
        assert_eq!(json["kind"], "completed");
        assert_eq!(json["final_time"], 42.0);

        let error = serde_json::to_value(&RunStatus::Error {
            detail: "boom".into(),
        })
        .expect("serialize");
        assert_eq!(error["kind"], "error");
        assert_eq!(error["detail"], "boom");

        let data = serde_json::to_value(&WorkerMessage::Data(Epoch::scalar_only(
            vec![0.0],
            vec![1.0],
        )))
        .expect("serialize");
        assert_eq!(data["type"], "data");
        assert_eq!(data["times"][0], 0.0);
    }
}
