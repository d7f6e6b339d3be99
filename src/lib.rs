pub mod alignment;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod types;

pub use alignment::calibration::{align_recordings, times_to_offsets, CalibrationOutcome};
pub use alignment::report::AlignmentReport;
pub use config::AlignerConfig;
pub use error::AlignmentError;
pub use pipeline::builder::SessionAlignerBuilder;
pub use pipeline::defaults::{ClockKind, IdentityClock, JsonFitSink, PulseTrainClock, SegmentedClock};
pub use pipeline::runtime::SessionAligner;
pub use pipeline::traits::{ClockTranslator, FitSink};
pub use types::{AffineCoefficients, Event, RecordingSource, Segment, UNSET};
