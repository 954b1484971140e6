//! Step Detector
//!
//! Converts the vertical-axis acceleration stream into discrete, rate-limited
//! step events. A sample becomes a step when all three hold:
//!
//! - `|y - last_y| > threshold`
//! - more than `refractory_ms` has elapsed since the last counted step
//! - the in-flight flag raised by the last counted step has cleared
//!
//! The two time gates are independent. The refractory gate compares elapsed
//! time; the in-flight gate is a flag with its own, longer clear delay that
//! spans the multi-peak signature of one physical step.

use crate::config::DetectorConfig;
use crate::types::{MotionSample, StepEvent};

/// Why a sample did not produce a step. Used for counters and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    /// Delta did not exceed the threshold
    BelowThreshold,
    /// Too soon after the last counted step
    Refractory,
    /// Still inside the previous step's in-flight window
    InFlight,
    /// Sample contained NaN or infinity
    NonFinite,
}

/// Outcome of feeding one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    Step(StepEvent),
    Suppressed(Suppression),
}

/// Per-reason counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    pub samples: u64,
    pub steps: u64,
    pub below_threshold: u64,
    pub refractory: u64,
    pub in_flight: u64,
    pub non_finite: u64,
}

/// Threshold-crossing step detector with refractory and in-flight gates.
#[derive(Debug, Clone)]
pub struct StepDetector {
    threshold: f64,
    refractory_ms: u64,
    in_flight_ms: u64,

    last_y: f64,
    /// `None` until the first step is counted.
    last_event_ms: Option<u64>,
    in_flight: bool,
    in_flight_clear_at_ms: u64,

    stats: DetectorStats,
}

impl StepDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            threshold: config.threshold,
            refractory_ms: config.refractory_ms,
            in_flight_ms: config.in_flight_ms,
            last_y: 0.0,
            last_event_ms: None,
            in_flight: false,
            in_flight_clear_at_ms: 0,
            stats: DetectorStats::default(),
        }
    }

    /// Feed one sample, returning the step it produced if any.
    pub fn process(&mut self, sample: &MotionSample) -> Option<StepEvent> {
        match self.classify(sample) {
            Detection::Step(event) => Some(event),
            Detection::Suppressed(_) => None,
        }
    }

    /// Feed one sample and report why it was or was not counted.
    pub fn classify(&mut self, sample: &MotionSample) -> Detection {
        self.stats.samples += 1;

        if !sample.y.is_finite() {
            self.stats.non_finite += 1;
            return Detection::Suppressed(Suppression::NonFinite);
        }

        let t = sample.timestamp_ms;
        self.clear_in_flight(t);

        let delta = (sample.y - self.last_y).abs();
        // Baseline tracks every finite sample, counted or not.
        self.last_y = sample.y;

        if delta <= self.threshold {
            self.stats.below_threshold += 1;
            return Detection::Suppressed(Suppression::BelowThreshold);
        }

        if let Some(last) = self.last_event_ms {
            if t.saturating_sub(last) <= self.refractory_ms {
                self.stats.refractory += 1;
                return Detection::Suppressed(Suppression::Refractory);
            }
        }

        if self.in_flight {
            self.stats.in_flight += 1;
            return Detection::Suppressed(Suppression::InFlight);
        }

        self.last_event_ms = Some(t);
        self.in_flight = true;
        self.in_flight_clear_at_ms = t.saturating_add(self.in_flight_ms);
        self.stats.steps += 1;

        Detection::Step(StepEvent { timestamp_ms: t })
    }

    /// Process a batch of samples and return all detected steps.
    pub fn process_batch(&mut self, samples: &[MotionSample]) -> Vec<StepEvent> {
        samples.iter().filter_map(|s| self.process(s)).collect()
    }

    /// Clear the in-flight flag once its delay has elapsed.
    fn clear_in_flight(&mut self, now_ms: u64) {
        if self.in_flight && now_ms >= self.in_flight_clear_at_ms {
            self.in_flight = false;
        }
    }

    pub const fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub const fn last_event_ms(&self) -> Option<u64> {
        self.last_event_ms
    }

    pub const fn stats(&self) -> DetectorStats {
        self.stats
    }
}

impl Default for StepDetector {
    fn default() -> Self {
        Self::new(&DetectorConfig::default())
    }
}
