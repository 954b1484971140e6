//! Config Validation Tests
//!
//! Typo detection (unknown keys with suggestions) and range validation,
//! exercised independently from the rest of the pipeline.

use pedocore::config::validation::{
    known_config_keys, suggest_correction, validate_ranges, validate_unknown_keys,
};
use pedocore::config::{ConfigError, StepConfig};

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_detector_threshold_warns_with_suggestion() {
    let toml_str = r#"
[detector]
treshold = 0.12
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("treshold"));
    assert_eq!(warnings[0].suggestion.as_deref(), Some("detector.threshold"));
}

#[test]
fn typo_in_user_section_warns() {
    let toml_str = r#"
[user]
di = "alice"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].field.contains("di"));
    assert_eq!(warnings[0].suggestion.as_deref(), Some("user.id"));
}

#[test]
fn valid_config_produces_zero_warnings() {
    let toml_str = r#"
[user]
id = "alice"

[detector]
threshold = 0.12
refractory_ms = 700
in_flight_ms = 1100

[aggregator]
flush_interval_secs = 15

[synthetic]
tick_ms = 2000
min_steps_per_tick = 1
max_steps_per_tick = 4

[sampling]
poll_interval_ms = 50
channel_capacity = 512

[history]
max_window_days = 90

[storage]
data_dir = "/var/lib/pedocore"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(
        warnings.is_empty(),
        "Valid config should produce zero warnings, got: {:?}",
        warnings.iter().map(|w| &w.field).collect::<Vec<_>>()
    );

    let config = StepConfig::from_toml_str(toml_str).unwrap();
    assert_eq!(config.user.id, "alice");
    assert_eq!(config.detector.refractory_ms, 700);
    assert_eq!(config.history.max_window_days, 90);
}

#[test]
fn unknown_section_without_close_match_has_no_suggestion() {
    let toml_str = r#"
[telemetry]
endpoint = "http://localhost"
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert!(!warnings.is_empty());
    assert!(warnings.iter().all(|w| w.suggestion.is_none()));
}

#[test]
fn suggestion_requires_small_edit_distance() {
    let known = known_config_keys();
    assert_eq!(
        suggest_correction("aggregator.flush_interval_sec", &known).as_deref(),
        Some("aggregator.flush_interval_secs")
    );
    assert!(suggest_correction("completely.different", &known).is_none());
}

#[test]
fn every_default_key_is_known() {
    let toml_str = StepConfig::default().to_toml().unwrap();
    assert!(validate_unknown_keys(&toml_str).is_empty());
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn defaults_pass_range_validation() {
    let (errors, warnings) = validate_ranges(&StepConfig::default());
    assert!(errors.is_empty(), "{errors:?}");
    assert!(warnings.is_empty(), "{warnings:?}");
}

#[test]
fn absurd_threshold_is_an_error() {
    let mut config = StepConfig::default();
    config.detector.threshold = 50.0;
    let (errors, _) = validate_ranges(&config);
    assert_eq!(errors.len(), 1);
    assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
}

#[test]
fn high_threshold_only_warns() {
    let mut config = StepConfig::default();
    config.detector.threshold = 3.0;
    let (errors, warnings) = validate_ranges(&config);
    assert!(errors.is_empty());
    assert!(warnings.iter().any(|w| w.field == "detector.threshold"));
    assert!(config.validate().is_ok());
}

#[test]
fn in_flight_shorter_than_refractory_warns() {
    let mut config = StepConfig::default();
    config.detector.in_flight_ms = 500;
    let (_, warnings) = validate_ranges(&config);
    assert!(warnings.iter().any(|w| w.field == "detector.in_flight_ms"));
}

#[test]
fn small_history_limit_warns() {
    let mut config = StepConfig::default();
    config.history.max_window_days = 14;
    let (_, warnings) = validate_ranges(&config);
    assert!(warnings.iter().any(|w| w.field == "history.max_window_days"));
}

#[test]
fn structural_errors_are_collected_together() {
    let toml_str = r#"
[detector]
threshold = -1.0
refractory_ms = 0

[synthetic]
min_steps_per_tick = 5
max_steps_per_tick = 2
"#;
    match StepConfig::from_toml_str(toml_str) {
        Err(ConfigError::Validation(errors)) => {
            assert_eq!(errors.len(), 3, "{errors:?}");
            assert!(errors.iter().any(|e| e.contains("detector.threshold")));
            assert!(errors.iter().any(|e| e.contains("refractory_ms")));
            assert!(errors.iter().any(|e| e.contains("min_steps_per_tick")));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn user_id_with_separator_rejected() {
    let toml_str = r#"
[user]
id = "a/b"
"#;
    assert!(matches!(
        StepConfig::from_toml_str(toml_str),
        Err(ConfigError::Validation(_))
    ));
}
