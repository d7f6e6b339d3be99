use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::alignment::regression::{residuals, theil_sen};
use crate::config::AlignerConfig;
use crate::error::AlignmentError;
use crate::pipeline::traits::FitSink;
use crate::types::{AffineCoefficients, Event, Segment};

const EVENT_LABEL_FIELD: &str = "event_label";

/// One hardware event log: every entry may carry times in several clocks.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SegmentLog {
    pub events: Vec<Map<String, Value>>,
}

impl SegmentLog {
    pub fn load(path: &Path) -> Result<Self, AlignmentError> {
        let data =
            std::fs::read_to_string(path).map_err(|e| AlignmentError::io("read event log", e))?;
        serde_json::from_str(&data).map_err(|e| AlignmentError::json("parse event log", e))
    }
}

/// Which fields of a log entry form the (source, dest) pair.
#[derive(Debug, Clone, Copy)]
pub struct PairSpec<'a> {
    pub source_label: &'a str,
    /// Source values are scaled by `1000 / source_rate` into milliseconds.
    pub source_rate: f64,
    pub dest_label: &'a str,
    pub excluded_labels: &'a [String],
}

/// (source, dest) pairs accumulated from one log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitPairs {
    pub source: Vec<f64>,
    pub dest: Vec<f64>,
}

impl FitPairs {
    pub fn collect(entries: &[Map<String, Value>], spec: &PairSpec<'_>) -> Self {
        entries
            .iter()
            .fold(Self::default(), |acc, entry| acc.push_entry(entry, spec))
    }

    fn push_entry(mut self, entry: &Map<String, Value>, spec: &PairSpec<'_>) -> Self {
        let (Some(source), Some(dest)) = (
            numeric_field(entry, spec.source_label),
            numeric_field(entry, spec.dest_label),
        ) else {
            return self;
        };
        let label = entry
            .get(EVENT_LABEL_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default();
        // Non-positive destination values were never recorded.
        if dest <= 0.0 || spec.excluded_labels.iter().any(|l| l == label) {
            return self;
        }
        self.source.push(source * 1000.0 / spec.source_rate);
        self.dest.push(dest);
        self
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }
}

fn numeric_field(entry: &Map<String, Value>, name: &str) -> Option<f64> {
    match entry.get(name)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A validated robust fit over one log.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentFit {
    pub label: String,
    pub log_index: usize,
    pub segment: Segment,
    pub source: Vec<f64>,
    pub dest: Vec<f64>,
    pub residuals: Vec<f64>,
    pub excessive_residuals: usize,
}

impl SegmentFit {
    /// More residuals above `max_residual` than `max_excessive_residuals` allows.
    pub fn has_excessive_residuals(&self, config: &AlignerConfig) -> bool {
        self.excessive_residuals > config.max_excessive_residuals
    }

    pub fn max_abs_residual(&self) -> f64 {
        self.residuals.iter().fold(0.0, |acc, r| acc.max(r.abs()))
    }
}

pub fn check_fit(
    coefficients: &AffineCoefficients,
    max_slope_deviation: f64,
) -> Result<(), AlignmentError> {
    if coefficients.slope_deviation() > max_slope_deviation {
        return Err(AlignmentError::SlopeOutOfRange {
            slope: coefficients.slope,
            max_deviation: max_slope_deviation,
        });
    }
    Ok(())
}

/// Fit one log's pairs. Logs with fewer than two usable pairs yield `None`.
pub fn fit_segment(
    pairs: FitPairs,
    label: String,
    log_index: usize,
    config: &AlignerConfig,
    sink: &dyn FitSink,
) -> Result<Option<SegmentFit>, AlignmentError> {
    if pairs.len() <= 1 {
        tracing::debug!(
            label = label.as_str(),
            log_index,
            pairs = pairs.len(),
            "segments: skipping log without enough usable events"
        );
        return Ok(None);
    }

    let coefficients = theil_sen(&pairs.source, &pairs.dest)?;
    if let Err(err) = sink.record_fit(&label, &pairs.source, &pairs.dest, &coefficients) {
        tracing::debug!(label = label.as_str(), error = %err, "could not save fit diagnostics");
    }
    check_fit(&coefficients, config.max_slope_deviation)?;

    let residuals = residuals(&pairs.source, &pairs.dest, &coefficients);
    let excessive_residuals = residuals
        .iter()
        .filter(|r| r.abs() > config.max_residual)
        .count();
    let boundary = pairs.source[pairs.len() - 1];
    tracing::debug!(
        label = label.as_str(),
        slope = coefficients.slope,
        intercept = coefficients.intercept,
        boundary,
        "segments: fitted segment"
    );
    let fit = SegmentFit {
        label,
        log_index,
        segment: Segment {
            coefficients,
            boundary,
        },
        source: pairs.source,
        dest: pairs.dest,
        residuals,
        excessive_residuals,
    };
    if fit.has_excessive_residuals(config) {
        tracing::warn!(
            label = fit.label.as_str(),
            excessive_residuals,
            max_residual = config.max_residual,
            "segments: fit has too many large residuals"
        );
    }
    Ok(Some(fit))
}

/// Fit every log for one (source, dest) label pair.
pub fn fit_segments(
    logs: &[SegmentLog],
    spec: &PairSpec<'_>,
    config: &AlignerConfig,
    sink: &dyn FitSink,
) -> Result<Vec<SegmentFit>, AlignmentError> {
    let mut fits = Vec::with_capacity(logs.len());
    for (i, log) in logs.iter().enumerate() {
        let pairs = FitPairs::collect(&log.events, spec);
        let label = format!("fit_{}_{}_{}", spec.source_label, spec.dest_label, i);
        if let Some(fit) = fit_segment(pairs, label, i, config, sink)? {
            fits.push(fit);
        }
    }
    if fits.is_empty() {
        return Err(AlignmentError::insufficient(
            "determine clock coefficients",
            format!("no log has two usable `{}` events", spec.source_label),
        ));
    }
    Ok(fits)
}

/// Write each fit residual into `msoffset` of the events logged at that time.
pub fn attach_residuals(events: &mut [Event], fit: &SegmentFit) {
    for (&time, &residual) in fit.source.iter().zip(&fit.residuals) {
        for event in events.iter_mut().filter(|e| e.mstime as f64 == time) {
            event.msoffset = residual as i64;
        }
    }
}
