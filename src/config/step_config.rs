//! Step Configuration - every detector, aggregator and sampling tunable
//!
//! Each section implements `Default` with the values in [`super::defaults`],
//! so an absent or empty config file behaves exactly like the built-in
//! constants.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "PEDOCORE_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "pedocore.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a step tracking deployment.
///
/// Load with `StepConfig::load()` which searches:
/// 1. `$PEDOCORE_CONFIG` env var
/// 2. `./pedocore.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepConfig {
    /// User scope for persisted records
    #[serde(default)]
    pub user: UserConfig,

    /// Step detector gates
    #[serde(default)]
    pub detector: DetectorConfig,

    /// Flush throttling
    #[serde(default)]
    pub aggregator: AggregatorConfig,

    /// Degraded-mode step synthesis
    #[serde(default)]
    pub synthetic: SyntheticConfig,

    /// Motion sensor sampling
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// History query limits
    #[serde(default)]
    pub history: HistoryConfig,

    /// Storage location
    #[serde(default)]
    pub storage: StorageConfig,
}

impl StepConfig {
    /// Load configuration using the standard search order:
    /// 1. `$PEDOCORE_CONFIG` environment variable
    /// 2. `./pedocore.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), user = %config.user.id, "Loaded step config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(user = %config.user.id, "Loaded step config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document.
    ///
    /// Unknown keys only produce warnings; structural and range errors fail.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate all values for internal consistency.
    ///
    /// Rules:
    /// - Detector threshold must be a positive finite number
    /// - All durations and capacities must be > 0
    /// - Synthetic min steps must not exceed max steps
    /// - User id must be a usable key segment
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let d = &self.detector;
        if !d.threshold.is_finite() || d.threshold <= 0.0 {
            errors.push(format!(
                "detector.threshold must be a finite number > 0 (got {})",
                d.threshold
            ));
        }
        if d.refractory_ms == 0 {
            errors.push("detector.refractory_ms must be > 0".to_string());
        }
        if d.in_flight_ms == 0 {
            errors.push("detector.in_flight_ms must be > 0".to_string());
        }

        if self.aggregator.flush_interval_secs == 0 {
            errors.push("aggregator.flush_interval_secs must be > 0".to_string());
        }

        let s = &self.synthetic;
        if s.tick_ms == 0 {
            errors.push("synthetic.tick_ms must be > 0".to_string());
        }
        if s.min_steps_per_tick > s.max_steps_per_tick {
            errors.push(format!(
                "synthetic.min_steps_per_tick ({}) must be <= max_steps_per_tick ({})",
                s.min_steps_per_tick, s.max_steps_per_tick
            ));
        }

        if self.sampling.channel_capacity == 0 {
            errors.push("sampling.channel_capacity must be > 0".to_string());
        }
        if self.sampling.poll_interval_ms == 0 {
            errors.push("sampling.poll_interval_ms must be > 0".to_string());
        }

        if self.history.max_window_days == 0 {
            errors.push("history.max_window_days must be > 0".to_string());
        }

        if let Err(e) = UserConfig::check_id(&self.user.id) {
            errors.push(format!("user.id {e}"));
        }

        let (range_errors, range_warnings) = super::validation::validate_ranges(self);
        errors.extend(range_errors);
        for w in &range_warnings {
            warn!("{}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {}", .0.display(), .1)]
    Io(PathBuf, std::io::Error),
    #[error("Config parse error ({}): {}", .0.display(), .1)]
    Parse(PathBuf, toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),
    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Sections
// ============================================================================

/// Owning user scope. Records are keyed by this id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default = "default_user_id")]
    pub id: String,
}

fn default_user_id() -> String {
    defaults::DEFAULT_USER_ID.to_string()
}

impl UserConfig {
    /// A user id becomes one segment of the record key.
    pub fn check_id(id: &str) -> Result<(), String> {
        if id.trim().is_empty() {
            Err("must not be empty".to_string())
        } else if id.contains('/') {
            Err(format!("'{id}' must not contain '/'"))
        } else {
            Ok(())
        }
    }
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            id: default_user_id(),
        }
    }
}

/// Step detector gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Minimum vertical delta for a step candidate
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    /// Minimum time since the last counted step (ms)
    #[serde(default = "default_refractory_ms")]
    pub refractory_ms: u64,

    /// In-flight suspension after a counted step (ms)
    #[serde(default = "default_in_flight_ms")]
    pub in_flight_ms: u64,
}

fn default_threshold() -> f64 {
    defaults::STEP_THRESHOLD
}
fn default_refractory_ms() -> u64 {
    defaults::REFRACTORY_MS
}
fn default_in_flight_ms() -> u64 {
    defaults::IN_FLIGHT_MS
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            refractory_ms: default_refractory_ms(),
            in_flight_ms: default_in_flight_ms(),
        }
    }
}

/// Flush throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

fn default_flush_interval_secs() -> u64 {
    defaults::FLUSH_INTERVAL_SECS
}

impl AggregatorConfig {
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

/// Degraded-mode step synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    #[serde(default = "default_synthetic_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_synthetic_min")]
    pub min_steps_per_tick: u64,
    #[serde(default = "default_synthetic_max")]
    pub max_steps_per_tick: u64,
}

fn default_synthetic_tick_ms() -> u64 {
    defaults::SYNTHETIC_TICK_MS
}
fn default_synthetic_min() -> u64 {
    defaults::SYNTHETIC_MIN_STEPS
}
fn default_synthetic_max() -> u64 {
    defaults::SYNTHETIC_MAX_STEPS
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_synthetic_tick_ms(),
            min_steps_per_tick: default_synthetic_min(),
            max_steps_per_tick: default_synthetic_max(),
        }
    }
}

/// Motion sensor sampling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_poll_interval_ms() -> u64 {
    defaults::SAMPLE_POLL_INTERVAL_MS
}
fn default_channel_capacity() -> usize {
    defaults::SAMPLE_CHANNEL_CAPACITY
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// History query limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_window_days")]
    pub max_window_days: u32,
}

fn default_max_window_days() -> u32 {
    defaults::MAX_HISTORY_WINDOW_DAYS
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_window_days: default_max_window_days(),
        }
    }
}

/// Storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}

impl StorageConfig {
    /// Path of the sled database directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(defaults::STEPS_DB_NAME)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = StepConfig::default();
        assert!(config.validate().is_ok(), "Default config must always validate");
    }

    #[test]
    fn test_empty_toml_produces_defaults() {
        let config: StepConfig = toml::from_str("").expect("empty TOML should parse");
        assert_eq!(config.detector.threshold, 0.1);
        assert_eq!(config.detector.refractory_ms, 800);
        assert_eq!(config.detector.in_flight_ms, 1200);
        assert_eq!(config.user.id, "local");
        assert_eq!(config.history.max_window_days, 366);
    }

    #[test]
    fn test_partial_toml_override() {
        let toml_str = r#"
[user]
id = "patient-42"

[detector]
threshold = 0.25
"#;
        let config = StepConfig::from_toml_str(toml_str).expect("partial TOML should parse");
        assert_eq!(config.user.id, "patient-42");
        assert_eq!(config.detector.threshold, 0.25);
        // Non-overridden values retain defaults
        assert_eq!(config.detector.refractory_ms, 800);
        assert_eq!(config.aggregator.flush_interval_secs, 10);
    }

    #[test]
    fn test_validation_catches_zero_threshold() {
        let mut config = StepConfig::default();
        config.detector.threshold = 0.0;
        let result = config.validate();
        assert!(result.is_err());
        if let Err(ConfigError::Validation(errors)) = result {
            assert!(errors.iter().any(|e| e.contains("detector.threshold")));
        }
    }

    #[test]
    fn test_validation_catches_nan_threshold() {
        let mut config = StepConfig::default();
        config.detector.threshold = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_catches_inverted_synthetic_range() {
        let mut config = StepConfig::default();
        config.synthetic.min_steps_per_tick = 5;
        config.synthetic.max_steps_per_tick = 2;
        let result = config.validate();
        assert!(result.is_err(), "min > max should fail validation");
    }

    #[test]
    fn test_validation_catches_zero_channel_capacity() {
        let mut config = StepConfig::default();
        config.sampling.channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_catches_slash_in_user_id() {
        let mut config = StepConfig::default();
        config.user.id = "a/b".to_string();
        let result = config.validate();
        if let Err(ConfigError::Validation(errors)) = result {
            assert!(errors.iter().any(|e| e.contains("user.id")));
        } else {
            panic!("expected validation error");
        }
    }

    #[test]
    fn test_roundtrip_toml() {
        let mut original = StepConfig::default();
        original.user.id = "roundtrip".to_string();
        let toml_str = original.to_toml().expect("serialization should work");
        let back = StepConfig::from_toml_str(&toml_str).expect("deserialization should work");
        assert_eq!(back.user.id, "roundtrip");
        assert_eq!(back.detector.in_flight_ms, original.detector.in_flight_ms);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pedocore.toml");
        std::fs::write(&path, "[aggregator]\nflush_interval_secs = 3\n").unwrap();
        let config = StepConfig::load_from_file(&path).unwrap();
        assert_eq!(config.aggregator.flush_interval(), Duration::from_secs(3));
    }

    #[test]
    fn test_load_from_missing_file_is_io_error() {
        let result = StepConfig::load_from_file(Path::new("/nonexistent/pedocore.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_, _))));
    }

    #[test]
    fn test_db_path_inside_data_dir() {
        let storage = StorageConfig {
            data_dir: PathBuf::from("/tmp/x"),
        };
        assert_eq!(storage.db_path(), PathBuf::from("/tmp/x/steps.db"));
    }
}
