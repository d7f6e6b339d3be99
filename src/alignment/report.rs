use serde::Serialize;

use crate::alignment::calibration::CalibrationOutcome;
use crate::alignment::segments::SegmentFit;
use crate::error::AlignmentError;
use crate::types::{AffineCoefficients, Event, UNSET};

pub const REPORT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct AlignmentReport {
    pub schema_version: u32,
    pub variant: String,
    pub counts: EventCounts,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recordings: Vec<RecordingReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<SegmentReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventCounts {
    pub total: usize,
    pub with_offset: usize,
    pub with_recording: usize,
    pub without_mstime: usize,
}

/// Outcome of calibrating one recording in the pulse-matching variant.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingReport {
    pub name: String,
    pub aligned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coefficients: Option<AffineCoefficients>,
    pub assigned_events: usize,
    pub out_of_bounds_events: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordingReport {
    pub fn calibrated(
        name: &str,
        outcome: &CalibrationOutcome,
        assigned_events: usize,
        out_of_bounds_events: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            aligned: true,
            start_index: Some(outcome.start_index),
            end_index: Some(outcome.end_index),
            coefficients: Some(outcome.coefficients),
            assigned_events,
            out_of_bounds_events,
            error: None,
        }
    }

    pub fn failed(name: &str, err: &AlignmentError) -> Self {
        Self {
            name: name.to_string(),
            aligned: false,
            start_index: None,
            end_index: None,
            coefficients: None,
            assigned_events: 0,
            out_of_bounds_events: 0,
            error: Some(err.to_string()),
        }
    }
}

/// One fitted segment of the segmented variant.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentReport {
    pub label: String,
    pub log_index: usize,
    pub pair_count: usize,
    pub coefficients: AffineCoefficients,
    pub boundary: f64,
    pub max_abs_residual: f64,
    pub excessive_residuals: usize,
}

impl SegmentReport {
    pub fn from_fit(fit: &SegmentFit) -> Self {
        Self {
            label: fit.label.clone(),
            log_index: fit.log_index,
            pair_count: fit.source.len(),
            coefficients: fit.segment.coefficients,
            boundary: fit.segment.boundary,
            max_abs_residual: fit.max_abs_residual(),
            excessive_residuals: fit.excessive_residuals,
        }
    }
}

impl AlignmentReport {
    pub fn new(variant: impl Into<String>, events: &[Event]) -> Self {
        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            variant: variant.into(),
            counts: count_events(events),
            recordings: Vec::new(),
            segments: Vec::new(),
        }
    }

    pub fn with_recordings(mut self, recordings: Vec<RecordingReport>) -> Self {
        self.recordings = recordings;
        self
    }

    pub fn with_segments(mut self, fits: &[SegmentFit]) -> Self {
        self.segments.extend(fits.iter().map(SegmentReport::from_fit));
        self
    }
}

fn count_events(events: &[Event]) -> EventCounts {
    EventCounts {
        total: events.len(),
        with_offset: events.iter().filter(|e| e.eegoffset >= 0).count(),
        with_recording: events.iter().filter(|e| !e.eegfile.is_empty()).count(),
        without_mstime: events.iter().filter(|e| e.mstime == UNSET).count(),
    }
}
