use serde::{Deserialize, Serialize};

/// Reserved value for "not computed / not applicable" in integer time fields.
pub const UNSET: i64 = -1;

fn unset() -> i64 {
    UNSET
}

/// A task event as produced by the log parsers.
///
/// Only the clock fields are interpreted; everything else rides along in
/// `extra` and is written back untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default = "unset")]
    pub session: i64,
    /// Task clock time in milliseconds.
    #[serde(default = "unset")]
    pub mstime: i64,
    /// Residual of the clock fit at this event, in milliseconds.
    #[serde(default = "unset")]
    pub msoffset: i64,
    /// Sample index into the recording named by `eegfile`.
    #[serde(default = "unset")]
    pub eegoffset: i64,
    #[serde(default)]
    pub eegfile: String,
    /// Host clock time, set on stimulation events only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_time: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, mstime: i64) -> Self {
        Self {
            event_type: event_type.into(),
            subject: String::new(),
            session: UNSET,
            mstime,
            msoffset: UNSET,
            eegoffset: UNSET,
            eegfile: String::new(),
            host_time: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn is_aligned(&self) -> bool {
        self.eegoffset != UNSET
    }
}

/// `dest = slope * source + intercept`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineCoefficients {
    pub slope: f64,
    pub intercept: f64,
}

impl AffineCoefficients {
    pub const IDENTITY: Self = Self {
        slope: 1.0,
        intercept: 0.0,
    };

    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    #[inline]
    pub fn apply(&self, source: f64) -> f64 {
        self.slope * source + self.intercept
    }

    #[inline]
    pub fn apply_backwards(&self, dest: f64) -> f64 {
        (dest - self.intercept) / self.slope
    }

    pub fn slope_deviation(&self) -> f64 {
        (1.0 - self.slope).abs()
    }
}

/// One affine map and the last source value it was fitted on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub coefficients: AffineCoefficients,
    pub boundary: f64,
}

/// A device recording as seen by the segmented variant's manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSource {
    pub name: String,
    /// Host clock time at which the recording started.
    pub start_time_ms: f64,
}
