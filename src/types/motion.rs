//! Motion sample and step event types

use serde::{Deserialize, Serialize};

/// One 3-axis acceleration reading.
///
/// `y` is the vertical axis consumed by the step detector. Timestamps are
/// milliseconds on a monotonic session clock; only differences matter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub timestamp_ms: u64,
    #[serde(default)]
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl MotionSample {
    /// Sample carrying only the vertical axis.
    pub const fn vertical(timestamp_ms: u64, y: f64) -> Self {
        Self {
            timestamp_ms,
            x: 0.0,
            y,
            z: 0.0,
        }
    }

    /// True when every axis is a finite number.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A step occurred at `timestamp_ms`. Never persisted individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepEvent {
    pub timestamp_ms: u64,
}
