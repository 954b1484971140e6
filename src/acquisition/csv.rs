//! Motion sample ingestion from CSV files
//!
//! Expected format (header optional):
//! `timestamp_ms,x,y,z`
//!
//! A row with only two fields is read as `timestamp_ms,y`.

use super::AcquisitionError;
use crate::types::MotionSample;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Read motion samples from a CSV file.
///
/// Malformed rows are skipped with a warning; only failing to open the
/// file is an error.
pub fn read_csv_samples(path: &Path) -> Result<Vec<MotionSample>, AcquisitionError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut samples = Vec::new();

    for (idx, line_result) in reader.lines().enumerate() {
        let line_num = idx + 1;

        let line = match line_result {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(line = line_num, error = %e, "Error reading CSV line");
                continue;
            }
        };

        if line_num == 1 && line.starts_with("timestamp") {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }

        match parse_csv_line(&line, line_num) {
            Ok(sample) => samples.push(sample),
            Err(e) => tracing::warn!(line = line_num, error = %e, "Error parsing CSV line"),
        }
    }

    tracing::info!(count = samples.len(), path = %path.display(), "Loaded motion samples from CSV");
    Ok(samples)
}

/// Parse a single CSV row into a MotionSample.
pub fn parse_csv_line(line: &str, line_num: usize) -> Result<MotionSample, AcquisitionError> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();

    let parse_err = |message: String| AcquisitionError::Parse {
        line: line_num,
        message,
    };

    let timestamp_ms = fields
        .first()
        .ok_or_else(|| parse_err("empty row".to_string()))?
        .parse::<u64>()
        .map_err(|e| parse_err(format!("timestamp_ms: {e}")))?;

    let num = |idx: usize, name: &str| -> Result<f64, AcquisitionError> {
        fields
            .get(idx)
            .ok_or_else(|| parse_err(format!("missing field '{name}'")))?
            .parse::<f64>()
            .map_err(|e| parse_err(format!("{name}: {e}")))
    };

    match fields.len() {
        2 => Ok(MotionSample::vertical(timestamp_ms, num(1, "y")?)),
        4 => Ok(MotionSample {
            timestamp_ms,
            x: num(1, "x")?,
            y: num(2, "y")?,
            z: num(3, "z")?,
        }),
        n => Err(parse_err(format!("expected 2 or 4 fields, got {n}"))),
    }
}
