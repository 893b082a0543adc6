//! Reference data, per-run output collection and fitness scoring.

use crate::error::{Result, SweepError};
use crate::orchestrator::{RunInstance, SlotState};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::{debug, error};

/// Fitness reported when computed and reference values agree exactly.
pub const FITNESS_CAP: f64 = f64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComparisonPoint {
    pub temperature: f64,
    pub reference_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunResult {
    pub temperature: f64,
    /// `0.0` when the run produced no usable output.
    pub computed_delay: f64,
    pub reference_time: f64,
}

impl RunResult {
    pub fn abs_error(&self) -> f64 {
        (self.computed_delay - self.reference_time).abs()
    }
}

pub fn read_reference_file(path: &Path) -> Result<Vec<ComparisonPoint>> {
    let text = fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SweepError::FileNotFound(path.to_path_buf()),
        _ => SweepError::io(format!("reading {}", path.display()), e),
    })?;
    Ok(parse_reference(&text))
}

/// Parses `inverse_temperature,time` rows. Column 0 is `1000 / T`; the
/// temperature is recovered and rounded half away from zero to a whole degree.
/// Rows that do not parse are skipped.
pub fn parse_reference(text: &str) -> Vec<ComparisonPoint> {
    let mut points = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        match parse_reference_row(idx + 1, line) {
            Ok(point) => points.push(point),
            Err(err) => debug!("{}", err),
        }
    }
    points
}

fn parse_reference_row(line_no: usize, line: &str) -> Result<ComparisonPoint> {
    let reject = |detail: &str| SweepError::ReferenceRowParse {
        line: line_no,
        detail: format!("{} in {:?}", detail, line),
    };
    let mut columns = line.split(',');
    let inverse: f64 = columns
        .next()
        .and_then(|c| c.trim().parse().ok())
        .ok_or_else(|| reject("bad column 0"))?;
    let reference_time: f64 = columns
        .next()
        .and_then(|c| c.trim().parse().ok())
        .ok_or_else(|| reject("bad column 1"))?;
    let temperature = (1000.0 / inverse).round();
    if !temperature.is_finite() {
        return Err(reject("non-finite temperature"));
    }
    Ok(ComparisonPoint {
        temperature,
        reference_time,
    })
}

/// Reads the scalar a solver run leaves behind: the first line as a float.
pub fn read_output(path: &Path) -> Result<f64> {
    let crash = |detail: String| SweepError::ProcessCrash {
        path: path.to_path_buf(),
        detail,
    };
    let text = fs::read_to_string(path).map_err(|e| crash(format!("unreadable output: {}", e)))?;
    let first = text.lines().next().unwrap_or("").trim();
    match first.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(crash(format!("no scalar on first line ({:?})", first))),
    }
}

/// Pairs every comparison point with its run's output. Slots that did not
/// succeed contribute the `0.0` sentinel.
pub fn collect(points: &[ComparisonPoint], slots: &[RunInstance], output_file: &str) -> Vec<RunResult> {
    points
        .iter()
        .enumerate()
        .map(|(idx, point)| {
            let delay = match slots.get(idx) {
                Some(slot) if slot.state == SlotState::Succeeded => {
                    match read_output(&slot.directory.join(output_file)) {
                        Ok(v) => v,
                        Err(err) => {
                            error!("{}", err);
                            0.0
                        }
                    }
                }
                _ => 0.0,
            };
            let result = RunResult {
                temperature: point.temperature,
                computed_delay: delay,
                reference_time: point.reference_time,
            };
            let delta = delay - point.reference_time;
            let relative = if point.reference_time != 0.0 {
                (delta.abs() * 100.0 / point.reference_time * 100.0).round() / 100.0
            } else {
                f64::NAN
            };
            debug!(
                "delay for temperature {}: expected {} computed {}",
                point.temperature, point.reference_time, delay
            );
            debug!("delta {} abs {} relative {}%", delta, delta.abs(), relative);
            result
        })
        .collect()
}

/// `1000 / Σ|computed − reference|`, capped at [`FITNESS_CAP`].
pub fn fitness(results: &[RunResult]) -> f64 {
    let total: f64 = results.iter().map(RunResult::abs_error).sum();
    if total == 0.0 {
        return FITNESS_CAP;
    }
    (1000.0 / total).min(FITNESS_CAP)
}
