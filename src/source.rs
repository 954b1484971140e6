//! Step source abstraction.
//!
//! A session counts steps from exactly one [`StepSource`], chosen once at
//! session start by [`select_source`]:
//!
//! - [`MotionStepSource`]: samples from a [`MotionSensor`] run through the
//!   [`StepDetector`]
//! - [`SyntheticStepSource`]: small randomized increments on a timer, used
//!   when the device has no motion capability (degraded mode)
//!
//! Degraded mode is permanent for the session and comes with a one-time
//! user notice.

use crate::acquisition::{AcquisitionError, MotionSensor, Subscription};
use crate::config::{DetectorConfig, StepConfig, SyntheticConfig};
use crate::detector::{DetectorStats, StepDetector};
use crate::types::{MotionSample, StepEvent};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{info, warn};

/// Notice shown to the user when the session falls back to synthetic steps.
pub const DEGRADED_NOTICE: &str =
    "Motion sensing is not available on this device. Step counts are simulated estimates.";

/// Events produced by a step source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepSourceEvent {
    /// One detected step.
    Step(StepEvent),
    /// A synthetic increment of `steps` (may be 0).
    Synthetic { steps: u64 },
    /// The source has no more data.
    Eof,
}

/// Which kind of source a session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Motion,
    Synthetic,
}

/// Where step increments come from.
///
/// The session calls [`next_event`](StepSource::next_event) inside a
/// `select!`, so implementations must be cancel safe: dropping the future
/// between polls must not lose state.
#[async_trait]
pub trait StepSource: Send + 'static {
    async fn next_event(&mut self) -> Result<StepSourceEvent, AcquisitionError>;

    /// Human-readable name for logging (e.g. "stdin", "synthetic").
    fn source_name(&self) -> &str;

    fn mode(&self) -> SourceMode;

    /// Detector counters, for sources that run one.
    fn detector_stats(&self) -> Option<DetectorStats> {
        None
    }

    /// Release anything held on the platform side. Called once at teardown.
    async fn shutdown(&mut self) {}
}

// ============================================================================
// Motion Source
// ============================================================================

/// Runs motion samples through the step detector.
pub struct MotionStepSource {
    sensor: Arc<dyn MotionSensor>,
    subscription: Option<Subscription>,
    samples: mpsc::Receiver<MotionSample>,
    detector: StepDetector,
}

impl MotionStepSource {
    /// Subscribe to `sensor` with a bounded channel of `capacity` samples.
    pub fn subscribe(
        sensor: Arc<dyn MotionSensor>,
        detector: &DetectorConfig,
        capacity: usize,
    ) -> Result<Self, AcquisitionError> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscription = sensor.subscribe(tx)?;
        Ok(Self {
            sensor,
            subscription: Some(subscription),
            samples: rx,
            detector: StepDetector::new(detector),
        })
    }
}

#[async_trait]
impl StepSource for MotionStepSource {
    async fn next_event(&mut self) -> Result<StepSourceEvent, AcquisitionError> {
        loop {
            let Some(sample) = self.samples.recv().await else {
                return Ok(StepSourceEvent::Eof);
            };
            if let Some(event) = self.detector.process(&sample) {
                return Ok(StepSourceEvent::Step(event));
            }
        }
    }

    fn source_name(&self) -> &str {
        self.sensor.name()
    }

    fn mode(&self) -> SourceMode {
        SourceMode::Motion
    }

    fn detector_stats(&self) -> Option<DetectorStats> {
        Some(self.detector.stats())
    }

    async fn shutdown(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.sensor.unsubscribe(subscription);
        }
        self.samples.close();
    }
}

// ============================================================================
// Synthetic Source
// ============================================================================

/// Emits `min..=max` steps every tick.
pub struct SyntheticStepSource {
    interval: Interval,
    min_steps: u64,
    max_steps: u64,
    rng: StdRng,
}

impl SyntheticStepSource {
    pub fn new(config: &SyntheticConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic variant for tests and reproducible demos.
    pub fn with_seed(config: &SyntheticConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: &SyntheticConfig, rng: StdRng) -> Self {
        let period = Duration::from_millis(config.tick_ms.max(1));
        // First tick one period from now, not immediately.
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let min_steps = config.min_steps_per_tick.min(config.max_steps_per_tick);
        Self {
            interval,
            min_steps,
            max_steps: config.max_steps_per_tick.max(min_steps),
            rng,
        }
    }
}

#[async_trait]
impl StepSource for SyntheticStepSource {
    async fn next_event(&mut self) -> Result<StepSourceEvent, AcquisitionError> {
        self.interval.tick().await;
        let steps = self.rng.gen_range(self.min_steps..=self.max_steps);
        Ok(StepSourceEvent::Synthetic { steps })
    }

    fn source_name(&self) -> &str {
        "synthetic"
    }

    fn mode(&self) -> SourceMode {
        SourceMode::Synthetic
    }
}

// ============================================================================
// Selection
// ============================================================================

/// The chosen source plus the notice to show, if any.
pub struct SourceSelection {
    pub source: Box<dyn StepSource>,
    pub notice: Option<String>,
}

impl SourceSelection {
    pub fn mode(&self) -> SourceMode {
        self.source.mode()
    }
}

impl std::fmt::Debug for SourceSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSelection")
            .field("source", &self.source.source_name())
            .field("notice", &self.notice)
            .finish()
    }
}

/// Probe `sensor` once and pick the session's step source.
///
/// An unavailable sensor, or one that refuses the subscription, selects the
/// synthetic source.
pub fn select_source(sensor: Arc<dyn MotionSensor>, config: &StepConfig) -> SourceSelection {
    if !sensor.is_available() {
        info!("[StepSource] Motion sensor '{}' unavailable, using synthetic steps", sensor.name());
        return synthetic(config);
    }

    match MotionStepSource::subscribe(sensor.clone(), &config.detector, config.sampling.channel_capacity) {
        Ok(source) => {
            info!("[StepSource] Counting steps from motion sensor '{}'", sensor.name());
            SourceSelection {
                source: Box::new(source),
                notice: None,
            }
        }
        Err(e) => {
            warn!("[StepSource] Subscribing to '{}' failed: {}, using synthetic steps", sensor.name(), e);
            synthetic(config)
        }
    }
}

fn synthetic(config: &StepConfig) -> SourceSelection {
    SourceSelection {
        source: Box::new(SyntheticStepSource::new(&config.synthetic)),
        notice: Some(DEGRADED_NOTICE.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{ReplaySensor, UnavailableSensor};

    fn walk() -> Vec<MotionSample> {
        vec![
            MotionSample::vertical(0, 0.0),
            MotionSample::vertical(100, 0.15),
            MotionSample::vertical(1000, 0.30),
            MotionSample::vertical(1850, 0.10),
        ]
    }

    #[tokio::test]
    async fn test_unavailable_sensor_selects_synthetic_with_notice() {
        let selection = select_source(
            Arc::new(UnavailableSensor::new("no accelerometer")),
            &StepConfig::default(),
        );
        assert_eq!(selection.mode(), SourceMode::Synthetic);
        assert_eq!(selection.notice.as_deref(), Some(DEGRADED_NOTICE));
    }

    #[tokio::test]
    async fn test_available_sensor_selects_motion_without_notice() {
        let sensor = Arc::new(ReplaySensor::from_samples(walk(), Duration::ZERO));
        let selection = select_source(sensor, &StepConfig::default());
        assert_eq!(selection.mode(), SourceMode::Motion);
        assert!(selection.notice.is_none());

        let mut source = selection.source;
        source.shutdown().await;
    }

    #[tokio::test]
    async fn test_motion_source_yields_detected_steps_then_eof() {
        let sensor = Arc::new(ReplaySensor::from_samples(walk(), Duration::ZERO));
        let mut source =
            MotionStepSource::subscribe(sensor, &DetectorConfig::default(), 8).unwrap();

        let mut steps = Vec::new();
        loop {
            match source.next_event().await.unwrap() {
                StepSourceEvent::Step(e) => steps.push(e.timestamp_ms),
                StepSourceEvent::Eof => break,
                StepSourceEvent::Synthetic { .. } => unreachable!(),
            }
        }
        assert_eq!(steps, vec![100, 1850]);
        assert_eq!(source.detector_stats().unwrap().samples, 4);
        source.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_subscription_falls_back_to_synthetic() {
        let sensor: Arc<dyn MotionSensor> =
            Arc::new(ReplaySensor::from_samples(walk(), Duration::ZERO));
        let mut first = select_source(sensor.clone(), &StepConfig::default());
        assert_eq!(first.mode(), SourceMode::Motion);

        // Input already consumed by the first subscription.
        let second = select_source(sensor, &StepConfig::default());
        assert_eq!(second.mode(), SourceMode::Synthetic);
        first.source.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthetic_increments_stay_in_range() {
        let config = SyntheticConfig {
            tick_ms: 1000,
            min_steps_per_tick: 1,
            max_steps_per_tick: 3,
        };
        let mut source = SyntheticStepSource::with_seed(&config, 7);
        for _ in 0..20 {
            match source.next_event().await.unwrap() {
                StepSourceEvent::Synthetic { steps } => assert!((1..=3).contains(&steps)),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthetic_waits_one_tick() {
        let config = SyntheticConfig {
            tick_ms: 500,
            min_steps_per_tick: 0,
            max_steps_per_tick: 0,
        };
        let start = tokio::time::Instant::now();
        let mut source = SyntheticStepSource::with_seed(&config, 1);
        assert_eq!(
            source.next_event().await.unwrap(),
            StepSourceEvent::Synthetic { steps: 0 }
        );
        assert!(start.elapsed() >= Duration::from_millis(500));
    }
}
