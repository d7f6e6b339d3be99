use crate::alignment::matcher::{intervals, match_sequence};
use crate::alignment::pulses::DevicePulses;
use crate::alignment::regression::least_squares;
use crate::alignment::report::RecordingReport;
use crate::config::AlignerConfig;
use crate::error::AlignmentError;
use crate::types::{AffineCoefficients, Event, UNSET};


/// Result of matching one device recording against the task pulse train.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationOutcome {
    /// Device sample offset for every input event time, in input order.
    pub offsets: Vec<i64>,
    /// Index into the task pulses where the start window begins.
    pub start_index: usize,
    /// Index into the task pulses where the end window begins.
    pub end_index: usize,
    /// Task ms -> device ms.
    pub coefficients: AffineCoefficients,
}

/// Pairing of `window` task pulses with `window` device pulses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MatchedWindow {
    device_index: usize,
    task_index: usize,
}

/// Slide a `window`-pulse slice along the device train and look for its
/// interval pattern anywhere in the task train. The first device position
/// that matches wins.
fn find_window(
    device_ms: &[i64],
    task_intervals: &[i64],
    window: usize,
    tolerance_ms: i64,
) -> Option<MatchedWindow> {
    if device_ms.len() < window {
        return None;
    }
    (0..=device_ms.len() - window).find_map(|i| {
        let needle = intervals(&device_ms[i..i + window]);
        match_sequence(&needle, task_intervals, tolerance_ms).map(|task_index| MatchedWindow {
            device_index: i,
            task_index,
        })
    })
}

/// Match pulse windows at both ends of a recording, fit task ms -> device ms
/// and convert every event time to a device sample offset.
pub fn times_to_offsets(
    task_ms: &[i64],
    device_ms: &[i64],
    event_ms: &[i64],
    sample_rate: u32,
    window: usize,
    tolerance_ms: i64,
) -> Result<CalibrationOutcome, AlignmentError> {
    if window < 2 {
        return Err(AlignmentError::invalid_input(format!(
            "pulse window must be at least 2, got {window}"
        )));
    }
    if sample_rate == 0 {
        return Err(AlignmentError::invalid_input("device sample rate must be positive"));
    }
    if task_ms.len() < window || device_ms.len() < window {
        return Err(AlignmentError::insufficient(
            "match sync pulses",
            format!(
                "{} task pulses and {} device pulses for a window of {window}",
                task_ms.len(),
                device_ms.len()
            ),
        ));
    }

    let task_intervals = intervals(task_ms);
    let start = find_window(device_ms, &task_intervals, window, tolerance_ms)
        .ok_or(AlignmentError::NoMatch { window: "start" })?;

    let device_rev: Vec<i64> = device_ms.iter().rev().copied().collect();
    let task_rev: Vec<i64> = task_ms.iter().rev().copied().collect();
    let end_rev = find_window(&device_rev, &intervals(&task_rev), window, tolerance_ms)
        .ok_or(AlignmentError::NoMatch { window: "end" })?;
    let end = MatchedWindow {
        device_index: device_ms.len() - end_rev.device_index - window,
        task_index: task_ms.len() - end_rev.task_index - window,
    };

    tracing::debug!(
        start_task = start.task_index,
        start_device = start.device_index,
        end_task = end.task_index,
        end_device = end.device_index,
        "calibration: matched pulse windows"
    );

    let x: Vec<f64> = task_ms[start.task_index..start.task_index + window]
        .iter()
        .chain(&task_ms[end.task_index..end.task_index + window])
        .map(|&t| t as f64)
        .collect();
    let y: Vec<f64> = device_ms[start.device_index..start.device_index + window]
        .iter()
        .chain(&device_ms[end.device_index..end.device_index + window])
        .map(|&t| t as f64)
        .collect();
    let coefficients = least_squares(&x, &y)?;

    let samples_per_ms = sample_rate as f64 / 1000.0;
    let offsets = event_ms
        .iter()
        .map(|&t| (coefficients.apply(t as f64) * samples_per_ms).round() as i64)
        .collect();

    Ok(CalibrationOutcome {
        offsets,
        start_index: start.task_index,
        end_index: end.task_index,
        coefficients,
    })
}

/// Pulses and size of one device recording made during the session.
#[derive(Debug, Clone)]
pub struct RecordingPulses {
    pub name: String,
    pub pulses: DevicePulses,
    pub sample_rate: u32,
}

/// Calibrate each recording independently and write in-bounds offsets into
/// `events`. An event keeps the first recording that claims it. Recordings
/// that cannot be calibrated are reported and skipped.
pub fn align_recordings(
    events: &mut [Event],
    task_ms: &[i64],
    recordings: &[RecordingPulses],
    config: &AlignerConfig,
) -> Vec<RecordingReport> {
    let event_ms: Vec<i64> = events.iter().map(|e| e.mstime).collect();
    let mut claimed = vec![false; events.len()];
    let mut reports = Vec::with_capacity(recordings.len());

    for recording in recordings {
        tracing::debug!(recording = recording.name.as_str(), "calibrating recording");
        let outcome = times_to_offsets(
            task_ms,
            &recording.pulses.ms,
            &event_ms,
            recording.sample_rate,
            config.window,
            config.tolerance_ms,
        );
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(
                    recording = recording.name.as_str(),
                    error = %err,
                    "unable to align events with recording"
                );
                reports.push(RecordingReport::failed(&recording.name, &err));
                continue;
            }
        };

        let upper = recording.pulses.num_samples as i64;
        let mut assigned = 0usize;
        let mut out_of_bounds = 0usize;
        for (i, (event, &offset)) in events.iter_mut().zip(&outcome.offsets).enumerate() {
            if claimed[i] || event.mstime == UNSET {
                continue;
            }
            if (0..=upper).contains(&offset) {
                event.eegoffset = offset;
                event.eegfile = recording.name.clone();
                claimed[i] = true;
                assigned += 1;
            } else {
                out_of_bounds += 1;
            }
        }
        if out_of_bounds > 0 {
            tracing::warn!(
                recording = recording.name.as_str(),
                out_of_bounds,
                "events are out of bounds of the recording"
            );
        }
        reports.push(RecordingReport::calibrated(
            &recording.name,
            &outcome,
            assigned,
            out_of_bounds,
        ));
    }

    reports
}
