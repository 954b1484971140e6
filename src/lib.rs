//! pedocore: motion-derived step counting
//!
//! Turns a stream of 3-axis acceleration samples into a per-user daily step
//! total, persists it on a throttled schedule and serves gap-filled history.
//!
//! ## Architecture
//!
//! - **Acquisition**: motion sensor capability and replay implementations
//! - **Step Detector**: threshold crossing with refractory and in-flight gates
//! - **Step Source**: motion-backed or synthetic (degraded mode), chosen once
//! - **Aggregator**: per-day counter with throttled, retrying persistence
//! - **History**: trailing-window series with missing days filled as 0
//! - **Session**: single consumer task that owns the counter

pub mod acquisition;
pub mod aggregator;
pub mod clock;
pub mod config;
pub mod detector;
pub mod history;
pub mod session;
pub mod source;
pub mod storage;
pub mod types;

// Re-export configuration
pub use config::StepConfig;

// Re-export commonly used types
pub use types::{DailyStepRecord, DailyTotal, MotionSample, StepEvent};

// Re-export the pipeline
pub use acquisition::{AcquisitionError, MotionSensor, ReplaySensor, Subscription, UnavailableSensor};
pub use aggregator::DailyStepAggregator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use detector::StepDetector;
pub use history::{HistoryError, HistoryQuery, HistoryWindow};
pub use session::{SessionError, SessionHandle, SessionSnapshot, SessionSummary, StepSession};
pub use source::{select_source, SourceMode, StepSource, StepSourceEvent};

// Re-export storage
pub use storage::{InMemoryStepStore, SledStepStore, StepStore, StoreError};
