use std::path::Path;

use serde::Deserialize;

use crate::error::AlignmentError;

/// Tunables shared by both alignment variants.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlignerConfig {
    /// Number of sync pulses matched at each end of the recording.
    pub window: usize,
    /// Largest per-interval discrepancy accepted while matching pulse trains.
    pub tolerance_ms: i64,
    /// Raw pulse samples closer than this to the previous one belong to the same pulse.
    pub refractory_ms: i64,
    pub max_slope_deviation: f64,
    pub max_residual: f64,
    pub max_excessive_residuals: usize,
    /// How far past the last segment a stim host time may fall before it is reported.
    pub stim_overrun_ms: f64,
    pub source_label: String,
    pub source_rate: f64,
    /// Host clock labels, tried in order until one yields a fit.
    pub host_labels: Vec<String>,
    pub host_rate: f64,
    pub dest_label: String,
    pub excluded_labels: Vec<String>,
}

impl AlignerConfig {
    pub const DEFAULT_WINDOW: usize = 100;
    pub const DEFAULT_TOLERANCE_MS: i64 = 10;
    pub const DEFAULT_REFRACTORY_MS: i64 = 100;

    pub fn load(path: &Path) -> Result<Self, AlignmentError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| AlignmentError::io("read aligner config", e))?;
        let config: Self = serde_json::from_str(&data)
            .map_err(|e| AlignmentError::json("parse aligner config", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AlignmentError> {
        if self.window < 2 {
            return Err(AlignmentError::invalid_input(format!(
                "window must cover at least 2 pulses, got {}",
                self.window
            )));
        }
        if self.tolerance_ms <= 0 {
            return Err(AlignmentError::invalid_input(format!(
                "tolerance_ms must be positive, got {}",
                self.tolerance_ms
            )));
        }
        if self.source_rate <= 0.0 || self.host_rate <= 0.0 {
            return Err(AlignmentError::invalid_input(
                "clock label rates must be positive",
            ));
        }
        if self.host_labels.is_empty() {
            return Err(AlignmentError::invalid_input(
                "at least one host label is required",
            ));
        }
        Ok(())
    }
}

impl Default for AlignerConfig {
    fn default() -> Self {
        Self {
            window: Self::DEFAULT_WINDOW,
            tolerance_ms: Self::DEFAULT_TOLERANCE_MS,
            refractory_ms: Self::DEFAULT_REFRACTORY_MS,
            max_slope_deviation: 0.05,
            max_residual: 1000.0,
            max_excessive_residuals: 2,
            stim_overrun_ms: 2000.0,
            source_label: "orig_timestamp".to_string(),
            source_rate: 1000.0,
            host_labels: vec!["t_event".to_string(), "t0".to_string()],
            host_rate: 1.0,
            dest_label: "offset".to_string(),
            excluded_labels: vec![
                "STIM".to_string(),
                "FEATURES".to_string(),
                "BIOMARKER".to_string(),
            ],
        }
    }
}
