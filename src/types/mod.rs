//! Shared data structures for the step tracking pipeline
//!
//! - MotionSample: raw 3-axis acceleration from the motion sensor
//! - StepEvent: a detection pulse produced by the step detector
//! - DailyStepRecord: the persisted per-user, per-day step total
//! - DailyTotal: one entry of a gap-filled history series

mod motion;
mod steps;

pub use motion::*;
pub use steps::*;
