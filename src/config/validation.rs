//! Config validation: unknown-key detection with Levenshtein suggestions
//! and range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

use super::defaults;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for StepConfig.
///
/// Maintained by hand to match the struct hierarchy in step_config.rs.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [user]
        "user",
        "user.id",
        // [detector]
        "detector",
        "detector.threshold",
        "detector.refractory_ms",
        "detector.in_flight_ms",
        // [aggregator]
        "aggregator",
        "aggregator.flush_interval_secs",
        // [synthetic]
        "synthetic",
        "synthetic.tick_ms",
        "synthetic.min_steps_per_tick",
        "synthetic.max_steps_per_tick",
        // [sampling]
        "sampling",
        "sampling.poll_interval_ms",
        "sampling.channel_capacity",
        // [history]
        "history",
        "history.max_window_days",
        // [storage]
        "storage",
        "storage.data_dir",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a_len = a.len();
    let b_len = b.len();
    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            curr[j + 1] = (prev[j + 1] + 1)
                .min(curr[j] + 1)
                .min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for &k in known {
        let dist = levenshtein(unknown, k);
        if dist <= 3 {
            if let Some((_, best_dist)) = best {
                if dist < best_dist {
                    best = Some((k, dist));
                }
            } else {
                best = Some((k, dist));
            }
        }
    }
    best.map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns. Existing configs
/// always continue to work.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    let found = walk_toml_keys(&value, "");
    let mut warnings = Vec::new();

    for key in &found {
        if !known.contains(key.as_str()) {
            let suggestion = suggest_correction(key, &known);
            let message = format!("Unknown config key '{key}'");
            warnings.push(ValidationWarning {
                field: key.clone(),
                message,
                suggestion,
            });
        }
    }

    warnings
}

// ============================================================================
// Range Validation
// ============================================================================

/// Validate value ranges on a parsed StepConfig.
///
/// Returns (errors, warnings). Errors are values that must prevent startup;
/// warnings are suspicious but not fatal.
pub fn validate_ranges(config: &super::StepConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let d = &config.detector;

    // A step delta above ~2g never occurs in walking data; nothing would be counted.
    if d.threshold.is_finite() && d.threshold > 20.0 {
        errors.push(format!(
            "detector.threshold = {:.2} is outside usable range (0-20 acceleration units)",
            d.threshold
        ));
    } else if d.threshold.is_finite() && d.threshold > 2.0 {
        warnings.push(ValidationWarning {
            field: "detector.threshold".to_string(),
            message: format!(
                "detector.threshold = {:.2} is above typical walking deltas (0.05-2.0)",
                d.threshold
            ),
            suggestion: None,
        });
    }

    // The in-flight gate only binds when it outlasts the refractory gate.
    if d.in_flight_ms > 0 && d.in_flight_ms <= d.refractory_ms {
        warnings.push(ValidationWarning {
            field: "detector.in_flight_ms".to_string(),
            message: format!(
                "detector.in_flight_ms ({}) <= refractory_ms ({}); in-flight gate has no effect",
                d.in_flight_ms, d.refractory_ms
            ),
            suggestion: None,
        });
    }

    // Faster than 5 steps/s is not walking or running.
    if d.refractory_ms > 0 && d.refractory_ms < 200 {
        warnings.push(ValidationWarning {
            field: "detector.refractory_ms".to_string(),
            message: format!(
                "detector.refractory_ms = {} allows more than 5 steps per second",
                d.refractory_ms
            ),
            suggestion: None,
        });
    }

    if config.history.max_window_days > 0
        && config.history.max_window_days < defaults::MONTH_WINDOW_DAYS
    {
        warnings.push(ValidationWarning {
            field: "history.max_window_days".to_string(),
            message: format!(
                "history.max_window_days = {} rejects monthly ({}-day) queries",
                config.history.max_window_days,
                defaults::MONTH_WINDOW_DAYS
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================
