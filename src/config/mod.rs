//! Step Configuration Module
//!
//! Per-deployment configuration loaded from TOML files. Replaces the
//! detector, throttle and sampling constants with operator-tunable values.
//!
//! ## Loading Order
//!
//! 1. `PEDOCORE_CONFIG` environment variable (path to TOML file)
//! 2. `pedocore.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! ## Usage
//!
//! ```ignore
//! // In main():
//! config::init(StepConfig::load());
//!
//! // Anywhere in the binary:
//! let threshold = config::get().detector.threshold;
//! ```
//!
//! Library components take their section by value (`DetectorConfig`,
//! `AggregatorConfig`, ...) so they stay testable without the global.

mod step_config;
pub mod defaults;
pub mod validation;

pub use step_config::*;

use std::sync::OnceLock;

/// Global step configuration, initialized once at startup.
static STEP_CONFIG: OnceLock<StepConfig> = OnceLock::new();

/// Initialize the global step configuration.
///
/// Later calls are ignored with a warning.
pub fn init(config: StepConfig) {
    if STEP_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get a reference to the global step configuration.
///
/// Falls back to built-in defaults when `init()` was never called.
pub fn get() -> &'static StepConfig {
    STEP_CONFIG.get_or_init(StepConfig::default)
}
