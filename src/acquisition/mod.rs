//! Motion sample acquisition
//!
//! The motion sensor is an external collaborator. This module defines the
//! capability the step pipeline consumes (`is_available`, `subscribe`,
//! `unsubscribe`) and ships local implementations:
//!
//! - [`ReplaySensor`]: replays samples from JSON lines (stdin) or a CSV file
//! - [`UnavailableSensor`]: a device with no motion capability
//!
//! Samples are delivered over a bounded `mpsc` channel. The subscriber owns
//! the receiving end; the sensor owns a producer task that stops when the
//! subscription is released.

pub mod csv;
pub mod replay;

pub use csv::read_csv_samples;
pub use replay::{ReplayInput, ReplaySensor};

use crate::types::MotionSample;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("motion capability unavailable: {0}")]
    Unavailable(String),
    #[error("sensor '{0}' already has an active subscription")]
    AlreadySubscribed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error on line {line}: {message}")]
    Parse { line: usize, message: String },
}

// ============================================================================
// Sensor Capability
// ============================================================================

/// Capability consumed from the platform's motion-sampling subsystem.
pub trait MotionSensor: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Whether the device can deliver motion samples (hardware + permission).
    fn is_available(&self) -> bool;

    /// Start delivering samples into `sink`.
    ///
    /// The returned [`Subscription`] must be handed back to
    /// [`unsubscribe`](MotionSensor::unsubscribe) when the session ends.
    fn subscribe(&self, sink: mpsc::Sender<MotionSample>) -> Result<Subscription, AcquisitionError>;

    /// Stop delivery for `subscription`.
    fn unsubscribe(&self, subscription: Subscription) {
        subscription.release();
    }
}

/// Handle to an active sample feed.
///
/// Releasing is explicit. Dropping an unreleased subscription still stops
/// the producer but logs a warning, since it means a session skipped its
/// teardown.
#[derive(Debug)]
pub struct Subscription {
    sensor: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    released: bool,
}

impl Subscription {
    pub fn new(sensor: impl Into<String>, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            sensor: sensor.into(),
            cancel,
            task: Some(task),
            released: false,
        }
    }

    pub fn sensor(&self) -> &str {
        &self.sensor
    }

    /// True while the producer task is still running.
    pub fn is_active(&self) -> bool {
        !self.released && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the producer. Idempotent.
    pub fn release(mut self) {
        self.stop();
        tracing::debug!(sensor = %self.sensor, "Motion subscription released");
    }

    /// Cancel the producer and wait for it to exit.
    pub async fn release_and_join(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(sensor = %self.sensor, error = %e, "Motion producer task ended abnormally");
            }
        }
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        self.released = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(sensor = %self.sensor, "Motion subscription dropped without release");
            self.cancel.cancel();
        }
    }
}

// ============================================================================
// Unavailable Sensor
// ============================================================================

/// A device with no motion capability (unsupported hardware, permission denied).
#[derive(Debug, Clone)]
pub struct UnavailableSensor {
    reason: String,
}

impl UnavailableSensor {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl MotionSensor for UnavailableSensor {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn subscribe(&self, _sink: mpsc::Sender<MotionSample>) -> Result<Subscription, AcquisitionError> {
        Err(AcquisitionError::Unavailable(self.reason.clone()))
    }
}
