use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::alignment::calibration::{times_to_offsets, CalibrationOutcome};
use crate::alignment::piecewise::PiecewiseTranslator;
use crate::alignment::segments::{fit_segments, PairSpec, SegmentFit, SegmentLog};
use crate::config::AlignerConfig;
use crate::error::AlignmentError;
use crate::pipeline::traits::{ClockTranslator, FitSink};
use crate::types::{AffineCoefficients, UNSET};

const UNSET_F: f64 = UNSET as f64;

/// Which hardware generation recorded the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockKind {
    /// Free-running pulse trains on both sides.
    PulseTrain,
    /// Per-log fits from a host computer between task and recording clocks.
    Segmented,
    /// Like `Segmented`, but the task runs on the host clock.
    SharedHostClock,
    /// Task and recording share one clock.
    Identity,
}

impl ClockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PulseTrain => "pulse_train",
            Self::Segmented => "segmented",
            Self::SharedHostClock => "shared_host_clock",
            Self::Identity => "identity",
        }
    }
}

pub struct NullFitSink;

impl FitSink for NullFitSink {
    fn record_fit(
        &self,
        _label: &str,
        _source: &[f64],
        _dest: &[f64],
        _coefficients: &AffineCoefficients,
    ) -> Result<(), AlignmentError> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct FitDump<'a> {
    label: &'a str,
    coefficients: &'a AffineCoefficients,
    /// `[source, dest, fitted, residual]` rows.
    points: Vec<[f64; 4]>,
}

/// Writes each fit as `<dir>/<label>_fit.json`.
pub struct JsonFitSink {
    dir: PathBuf,
}

impl JsonFitSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FitSink for JsonFitSink {
    fn record_fit(
        &self,
        label: &str,
        source: &[f64],
        dest: &[f64],
        coefficients: &AffineCoefficients,
    ) -> Result<(), AlignmentError> {
        fs::create_dir_all(&self.dir).map_err(|e| AlignmentError::io("create fit dump dir", e))?;
        let points = source
            .iter()
            .zip(dest)
            .map(|(&x, &y)| {
                let fitted = coefficients.apply(x);
                [x, y, fitted, y - fitted]
            })
            .collect();
        let dump = FitDump {
            label,
            coefficients,
            points,
        };
        let path = self.dir.join(format!("{label}_fit.json"));
        let mut file = File::create(&path).map_err(|e| AlignmentError::io("create fit dump", e))?;
        serde_json::to_writer_pretty(&mut file, &dump)
            .map_err(|e| AlignmentError::json("serialize fit dump", e))?;
        file.write_all(b"\n")
            .map_err(|e| AlignmentError::io("finalize fit dump", e))
    }
}

/// Global fit between free-running pulse trains; translates task ms to
/// recording samples.
pub struct PulseTrainClock {
    task_ms: Vec<i64>,
    device_ms: Vec<i64>,
    sample_rate: u32,
    window: usize,
    tolerance_ms: i64,
    outcome: Option<CalibrationOutcome>,
}

impl PulseTrainClock {
    pub fn new(
        task_ms: Vec<i64>,
        device_ms: Vec<i64>,
        sample_rate: u32,
        config: &AlignerConfig,
    ) -> Self {
        Self {
            task_ms,
            device_ms,
            sample_rate,
            window: config.window,
            tolerance_ms: config.tolerance_ms,
            outcome: None,
        }
    }

    pub fn outcome(&self) -> Option<&CalibrationOutcome> {
        self.outcome.as_ref()
    }
}

impl ClockTranslator for PulseTrainClock {
    fn calibrate(&mut self) -> Result<(), AlignmentError> {
        let outcome = times_to_offsets(
            &self.task_ms,
            &self.device_ms,
            &[],
            self.sample_rate,
            self.window,
            self.tolerance_ms,
        )?;
        self.outcome = Some(outcome);
        Ok(())
    }

    fn translate(&self, value: f64, backwards: bool) -> Option<f64> {
        if value == UNSET_F {
            return Some(UNSET_F);
        }
        let coefficients = &self.outcome.as_ref()?.coefficients;
        let samples_per_ms = self.sample_rate as f64 / 1000.0;
        Some(if backwards {
            coefficients.apply_backwards(value / samples_per_ms)
        } else {
            coefficients.apply(value) * samples_per_ms
        })
    }

    fn name(&self) -> &'static str {
        ClockKind::PulseTrain.as_str()
    }
}

/// Robust per-log fits of one clock label against the recording clock.
#[derive(Clone)]
pub struct SegmentedClock {
    logs: Arc<[SegmentLog]>,
    source_label: String,
    source_rate: f64,
    config: AlignerConfig,
    sink: Arc<dyn FitSink>,
    fits: Vec<SegmentFit>,
    translator: Option<PiecewiseTranslator>,
}

impl SegmentedClock {
    pub fn new(
        logs: Arc<[SegmentLog]>,
        source_label: impl Into<String>,
        source_rate: f64,
        config: AlignerConfig,
        sink: Arc<dyn FitSink>,
    ) -> Self {
        Self {
            logs,
            source_label: source_label.into(),
            source_rate,
            config,
            sink,
            fits: Vec::new(),
            translator: None,
        }
    }

    pub fn source_label(&self) -> &str {
        &self.source_label
    }

    pub fn fits(&self) -> &[SegmentFit] {
        &self.fits
    }

    pub fn translator(&self) -> Option<&PiecewiseTranslator> {
        self.translator.as_ref()
    }

    /// The fitted map, or an error before `calibrate` has succeeded.
    pub fn calibrated(&self) -> Result<&PiecewiseTranslator, AlignmentError> {
        self.translator.as_ref().ok_or_else(|| {
            AlignmentError::insufficient(
                "translate clock values",
                format!("`{}` clock is not calibrated", self.source_label),
            )
        })
    }
}

impl ClockTranslator for SegmentedClock {
    fn calibrate(&mut self) -> Result<(), AlignmentError> {
        let spec = PairSpec {
            source_label: &self.source_label,
            source_rate: self.source_rate,
            dest_label: &self.config.dest_label,
            excluded_labels: &self.config.excluded_labels,
        };
        let fits = fit_segments(&self.logs, &spec, &self.config, self.sink.as_ref())?;
        let translator = PiecewiseTranslator::new(fits.iter().map(|f| f.segment).collect())?;
        self.fits = fits;
        self.translator = Some(translator);
        Ok(())
    }

    fn translate(&self, value: f64, backwards: bool) -> Option<f64> {
        self.translator.as_ref()?.translate(value, backwards)
    }

    fn name(&self) -> &'static str {
        ClockKind::Segmented.as_str()
    }
}

pub struct IdentityClock;

impl ClockTranslator for IdentityClock {
    fn calibrate(&mut self) -> Result<(), AlignmentError> {
        Ok(())
    }

    fn translate(&self, value: f64, _backwards: bool) -> Option<f64> {
        Some(value)
    }

    fn name(&self) -> &'static str {
        ClockKind::Identity.as_str()
    }
}
