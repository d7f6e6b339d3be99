use crate::error::AlignmentError;
use crate::types::AffineCoefficients;

/// Conversion between the task clock and the recording clock.
///
/// Forward translation takes task milliseconds to recording samples (or
/// recording milliseconds); `backwards` inverts it.
pub trait ClockTranslator: Send + Sync {
    /// Derive the conversion from the inputs the translator was built with.
    fn calibrate(&mut self) -> Result<(), AlignmentError>;

    /// `None` when no calibrated map covers `value`.
    fn translate(&self, value: f64, backwards: bool) -> Option<f64>;

    fn name(&self) -> &'static str;
}

/// Receives every segment fit for diagnostics. Implementations may do nothing.
pub trait FitSink: Send + Sync {
    fn record_fit(
        &self,
        label: &str,
        source: &[f64],
        dest: &[f64],
        coefficients: &AffineCoefficients,
    ) -> Result<(), AlignmentError>;
}
