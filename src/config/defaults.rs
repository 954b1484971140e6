//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery. Every tunable here has a
//! matching field in [`StepConfig`](super::StepConfig); these are the values
//! used when no config file is present.

// ============================================================================
// Step Detector
// ============================================================================

/// Minimum vertical-axis delta (acceleration units) for a step candidate.
pub const STEP_THRESHOLD: f64 = 0.1;

/// Minimum time between two counted steps (ms).
pub const REFRACTORY_MS: u64 = 800;

/// Suspension window after a counted step before the in-flight flag clears (ms).
///
/// Longer than the refractory period; spans the deceleration tail of one
/// physical step.
pub const IN_FLIGHT_MS: u64 = 1_200;

// ============================================================================
// Motion Sampling
// ============================================================================

/// Typical polling interval of the motion sensor (ms).
pub const SAMPLE_POLL_INTERVAL_MS: u64 = 100;

/// Bounded channel capacity between the sensor producer and the session.
pub const SAMPLE_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Aggregator
// ============================================================================

/// Minimum time between two throttled flushes (seconds).
pub const FLUSH_INTERVAL_SECS: u64 = 10;

/// Capacity of the session command channel.
pub const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Capacity of the store's change broadcast channel.
pub const WATCH_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// Synthetic (degraded) Mode
// ============================================================================

/// Interval between synthetic step bursts (ms).
pub const SYNTHETIC_TICK_MS: u64 = 1_000;

/// Smallest synthetic increment per tick.
pub const SYNTHETIC_MIN_STEPS: u64 = 0;

/// Largest synthetic increment per tick.
pub const SYNTHETIC_MAX_STEPS: u64 = 3;

// ============================================================================
// History
// ============================================================================

/// Trailing days in a weekly history window.
pub const WEEK_WINDOW_DAYS: u32 = 7;

/// Trailing days in a monthly history window.
pub const MONTH_WINDOW_DAYS: u32 = 30;

/// Largest accepted history window (days).
pub const MAX_HISTORY_WINDOW_DAYS: u32 = 366;

// ============================================================================
// Storage / Identity
// ============================================================================

/// User scope used when none is configured.
pub const DEFAULT_USER_ID: &str = "local";

/// Data directory holding the sled database and the process lock.
pub const DATA_DIR: &str = "./data";

/// sled database directory name inside [`DATA_DIR`].
pub const STEPS_DB_NAME: &str = "steps.db";
