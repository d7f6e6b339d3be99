use std::path::PathBuf;

use crate::alignment::assemble;
use crate::alignment::piecewise::resolve_unaligned;
use crate::alignment::report::AlignmentReport;
use crate::alignment::segments::SegmentFit;
use crate::config::AlignerConfig;
use crate::error::AlignmentError;
use crate::pipeline::builder::SessionAlignerBuilder;
use crate::pipeline::defaults::{ClockKind, SegmentedClock};
use crate::pipeline::traits::ClockTranslator;
use crate::types::{Event, RecordingSource, Segment, UNSET};

/// Stateful aligner for sessions whose hardware logs carry task, host and
/// recording times side by side.
pub struct SessionAligner {
    events: Vec<Event>,
    merged_events: Vec<Event>,
    task_clock: SegmentedClock,
    host_clock: SegmentedClock,
    recordings: Vec<RecordingSource>,
    config: AlignerConfig,
    kind: ClockKind,
}

pub(crate) struct SessionAlignerParts {
    pub events: Vec<Event>,
    pub task_clock: SegmentedClock,
    pub host_clock: SegmentedClock,
    pub recordings: Vec<RecordingSource>,
    pub config: AlignerConfig,
    pub kind: ClockKind,
}

impl SessionAligner {
    pub(crate) fn from_parts(parts: SessionAlignerParts) -> Self {
        Self {
            merged_events: parts.events.clone(),
            events: parts.events,
            task_clock: parts.task_clock,
            host_clock: parts.host_clock,
            recordings: parts.recordings,
            config: parts.config,
            kind: parts.kind,
        }
    }

    /// Fit the event logs at `log_paths` with no recording manifest or fit sink.
    pub fn from_event_logs(
        events: Vec<Event>,
        log_paths: Vec<PathBuf>,
        config: AlignerConfig,
    ) -> Result<Self, AlignmentError> {
        SessionAlignerBuilder::new(config)
            .with_log_paths(log_paths)
            .build(events)
    }

    pub fn kind(&self) -> ClockKind {
        self.kind
    }

    /// Task events merged with any stim events added so far.
    pub fn events(&self) -> &[Event] {
        &self.merged_events
    }

    pub fn host_label(&self) -> &str {
        self.host_clock.source_label()
    }

    pub fn task_fits(&self) -> &[SegmentFit] {
        self.task_clock.fits()
    }

    pub fn host_fits(&self) -> &[SegmentFit] {
        self.host_clock.fits()
    }

    pub fn recordings(&self) -> &[RecordingSource] {
        &self.recordings
    }

    /// Convert a stim event's host time to task milliseconds by way of the
    /// recording clock.
    pub fn stim_event_to_mstime(&self, event: &Event) -> Result<f64, AlignmentError> {
        let host_time = event.host_time.ok_or_else(|| {
            AlignmentError::invalid_input(format!("{} event has no host time", event.event_type))
        })?;
        let host_fits = self.host_fits_by_boundary()?;
        let host_fit = match host_fits.iter().position(|f| host_time <= f.segment.boundary) {
            Some(index) => host_fits[index],
            None => {
                let last = host_fits[host_fits.len() - 1];
                let overrun_ms = host_time - last.segment.boundary;
                if overrun_ms > self.config.stim_overrun_ms {
                    tracing::error!(host_time, overrun_ms, "stim time extends beyond end of log file");
                }
                last
            }
        };

        let device_time = host_fit.segment.coefficients.apply(host_time);
        Ok(self
            .task_segment_for(host_fit)?
            .coefficients
            .apply_backwards(device_time))
    }

    /// Merge stim events into the task events in task-time order. Every
    /// merged event takes the subject and session of the last task event,
    /// since stim can be logged before the session starts.
    pub fn add_stim_events(&mut self, stim_events: Vec<Event>) -> Result<&[Event], AlignmentError> {
        let mut merged = self.events.clone();
        let added = stim_events.len();
        for mut stim in stim_events {
            stim.mstime = self.stim_event_to_mstime(&stim)? as i64;
            // Untimed events keep their place; only timed ones order the insert.
            let at = merged
                .iter()
                .position(|e| e.mstime != UNSET && e.mstime > stim.mstime)
                .unwrap_or(merged.len());
            merged.insert(at, stim);
        }
        if let Some(last) = self.events.last() {
            for event in &mut merged {
                event.subject.clone_from(&last.subject);
                event.session = last.session;
            }
        }
        tracing::debug!(added, total = merged.len(), "merged stim events");
        self.merged_events = merged;
        Ok(&self.merged_events)
    }

    /// Fill recording offsets from task times and task times from recording
    /// offsets, on a copy of the merged events.
    ///
    /// Events up to and including the first `start_type` event may remain
    /// unaligned.
    pub fn align(&self, start_type: Option<&str>) -> Result<Vec<Event>, AlignmentError> {
        let mut events = self.merged_events.clone();
        align_events(&mut events, &self.task_clock, start_type)?;
        Ok(events)
    }

    pub fn apply_recording_labels(&self, events: &mut [Event]) -> Result<(), AlignmentError> {
        let host_fits = self.host_fits_by_boundary()?;
        assemble::apply_recording_labels(events, &self.recordings, |recording| {
            let host_fit = host_fits
                .iter()
                .find(|f| f.segment.boundary > recording.start_time_ms)
                .unwrap_or(&host_fits[host_fits.len() - 1]);
            Ok(self.task_segment_for(host_fit)?.coefficients.apply_backwards(0.0))
        })
    }

    /// `align` followed by `apply_recording_labels`.
    pub fn run(&self, start_type: Option<&str>) -> Result<Vec<Event>, AlignmentError> {
        let mut events = self.align(start_type)?;
        self.apply_recording_labels(&mut events)?;
        Ok(events)
    }

    pub fn report(&self, events: &[Event]) -> AlignmentReport {
        let report = AlignmentReport::new(self.kind.as_str(), events).with_segments(self.task_fits());
        match self.kind {
            ClockKind::SharedHostClock => report,
            _ => report.with_segments(self.host_fits()),
        }
    }

    /// Host fits in the order the host translator holds its segments.
    fn host_fits_by_boundary(&self) -> Result<Vec<&SegmentFit>, AlignmentError> {
        self.host_clock.calibrated()?;
        self.task_clock.calibrated()?;
        let mut fits: Vec<&SegmentFit> = self.host_fits().iter().collect();
        fits.sort_by(|a, b| a.segment.boundary.total_cmp(&b.segment.boundary));
        Ok(fits)
    }

    /// Task segment fitted from the same log as `host_fit`.
    fn task_segment_for(&self, host_fit: &SegmentFit) -> Result<&Segment, AlignmentError> {
        self.task_fits()
            .iter()
            .find(|f| f.log_index == host_fit.log_index)
            .map(|f| &f.segment)
            .ok_or_else(|| {
                AlignmentError::insufficient(
                    "pair host and task clocks",
                    format!(
                        "event log {} has no `{}` fit for its `{}` segment",
                        host_fit.log_index,
                        self.task_clock.source_label(),
                        self.host_clock.source_label()
                    ),
                )
            })
    }
}

/// Translate every event still lacking a recording offset, then recover the
/// task time of every event that only has a recording offset.
pub fn align_events(
    events: &mut [Event],
    clock: &dyn ClockTranslator,
    start_type: Option<&str>,
) -> Result<(), AlignmentError> {
    let unaligned: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.eegoffset == UNSET)
        .map(|(i, _)| i)
        .collect();
    let starts_at = match start_type {
        Some(start_type) => unaligned
            .iter()
            .position(|&i| events[i].event_type == start_type)
            .map_or(1, |p| p + 1),
        None => 0,
    };

    let mapped = unaligned
        .iter()
        .map(|&i| clock.translate(events[i].mstime as f64, false))
        .collect();
    let offsets = resolve_unaligned(mapped, starts_at)?;
    for (&i, offset) in unaligned.iter().zip(offsets) {
        events[i].eegoffset = if offset < 0.0 { UNSET } else { offset as i64 };
    }

    let untimed: Vec<usize> = events
        .iter()
        .enumerate()
        .filter(|(_, e)| e.mstime == UNSET)
        .map(|(i, _)| i)
        .collect();
    let mapped = untimed
        .iter()
        .map(|&i| clock.translate(events[i].eegoffset as f64, true))
        .collect();
    let times = resolve_unaligned(mapped, 0)?;
    for (&i, time) in untimed.iter().zip(times) {
        events[i].mstime = time as i64;
    }

    tracing::debug!(
        clock = clock.name(),
        translated = unaligned.len(),
        recovered = untimed.len(),
        starts_at,
        "aligned events"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::alignment::segments::SegmentLog;
    use crate::pipeline::defaults::IdentityClock;

    const HOST_SHIFT_MS: f64 = 2_000_000.0;

    /// Ten log entries one second apart. Recording offset is `task + intercept`
    /// and host time is `task + HOST_SHIFT_MS`, logged in seconds.
    fn log(start_ms: f64, intercept: f64) -> SegmentLog {
        let events = (0..10)
            .map(|k| {
                let t = start_ms + 1_000.0 * k as f64;
                let entry = json!({
                    "event_label": "WORD",
                    "orig_timestamp": t,
                    "t_event": (t + HOST_SHIFT_MS) / 1_000.0,
                    "offset": t + intercept,
                });
                match entry {
                    Value::Object(map) => map,
                    _ => unreachable!(),
                }
            })
            .collect();
        SegmentLog { events }
    }

    fn task_events(times: &[i64]) -> Vec<Event> {
        times
            .iter()
            .map(|&t| {
                let mut e = Event::new("WORD", t);
                e.subject = "R1001P".to_string();
                e.session = 2;
                e
            })
            .collect()
    }

    fn single_log_aligner(events: Vec<Event>) -> SessionAligner {
        SessionAlignerBuilder::new(AlignerConfig::default())
            .with_event_logs(vec![log(10_000.0, 500.0)])
            .build(events)
            .expect("aligner")
    }

    #[test]
    fn align_translates_task_times_to_offsets() {
        let aligner = single_log_aligner(task_events(&[5_000, 12_000, 25_000]));
        assert_eq!(aligner.host_label(), "t_event");
        let out = aligner.align(None).unwrap();
        let offsets: Vec<i64> = out.iter().map(|e| e.eegoffset).collect();
        assert_eq!(offsets, vec![5_500, 12_500, 25_500]);
        // The copy is aligned, not the aligner's own events.
        assert!(aligner.events().iter().all(|e| e.eegoffset == UNSET));
    }

    #[test]
    fn events_with_only_an_offset_get_a_task_time() {
        let mut events = task_events(&[12_000]);
        let mut untimed = Event::new("STIM_OFF", UNSET);
        untimed.eegoffset = 15_500;
        events.push(untimed);
        let aligner = single_log_aligner(events);
        let out = aligner.align(None).unwrap();
        assert_eq!(out[1].mstime, 15_000);
        assert_eq!(out[1].eegoffset, 15_500);
    }

    #[test]
    fn unaligned_events_before_start_type_are_tolerated() {
        let mut events = task_events(&[-50, 11_000, 12_000]);
        events[1].event_type = "SESS_START".to_string();
        let aligner = single_log_aligner(events);
        let out = aligner.align(Some("SESS_START")).unwrap();
        assert_eq!(out[0].eegoffset, UNSET);
        assert_eq!(out[2].eegoffset, 12_500);
    }

    #[test]
    fn unaligned_event_after_start_is_fatal() {
        let aligner = single_log_aligner(task_events(&[11_000, 12_000, -50]));
        let err = aligner.align(Some("SESS_START")).unwrap_err();
        assert!(matches!(err, AlignmentError::Unaligned { count: 1, .. }));
    }

    #[test]
    fn stim_host_time_converts_through_recording_clock() {
        let aligner = single_log_aligner(task_events(&[12_000]));
        let mut stim = Event::new("STIM_ON", UNSET);
        stim.host_time = Some(HOST_SHIFT_MS + 15_500.0);
        let mstime = aligner.stim_event_to_mstime(&stim).unwrap();
        assert!((mstime - 15_500.0).abs() < 1e-6);

        // Past the last segment the last map still applies.
        stim.host_time = Some(HOST_SHIFT_MS + 40_000.0);
        let mstime = aligner.stim_event_to_mstime(&stim).unwrap();
        assert!((mstime - 40_000.0).abs() < 1e-6);

        stim.host_time = None;
        assert!(matches!(
            aligner.stim_event_to_mstime(&stim),
            Err(AlignmentError::InvalidInput { .. })
        ));
    }

    #[test]
    fn stim_events_merge_in_task_order_with_session_identity() {
        let mut aligner = single_log_aligner(task_events(&[11_000, 13_000, 15_000]));
        let mut stim = Event::new("STIM_ON", UNSET);
        stim.host_time = Some(HOST_SHIFT_MS + 14_000.0);
        let merged = aligner.add_stim_events(vec![stim]).unwrap();
        let types: Vec<&str> = merged.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["WORD", "WORD", "STIM_ON", "WORD"]);
        assert_eq!(merged[2].mstime, 14_000);
        assert_eq!(merged[2].subject, "R1001P");
        assert_eq!(merged[2].session, 2);

        let out = aligner.align(None).unwrap();
        assert_eq!(out[2].eegoffset, 14_500);
    }

    #[test]
    fn recordings_label_events_from_their_task_start() {
        let events = task_events(&[12_000, 18_000, 31_000, 35_000]);
        let aligner = SessionAlignerBuilder::new(AlignerConfig::default())
            .with_event_logs(vec![log(10_000.0, 500.0), log(30_000.0, -29_000.0)])
            .with_recordings(vec![
                RecordingSource {
                    name: "second".to_string(),
                    start_time_ms: HOST_SHIFT_MS + 29_000.0,
                },
                RecordingSource {
                    name: "first".to_string(),
                    start_time_ms: HOST_SHIFT_MS + 9_500.0,
                },
            ])
            .build(events)
            .expect("aligner");
        let mut out = aligner.events().to_vec();
        aligner.apply_recording_labels(&mut out).unwrap();
        let labels: Vec<&str> = out.iter().map(|e| e.eegfile.as_str()).collect();
        assert_eq!(labels, vec!["first", "first", "second", "second"]);
    }

    /// `log` with task times stripped from every entry but the first.
    fn log_without_task_times(start_ms: f64, intercept: f64) -> SegmentLog {
        let mut log = log(start_ms, intercept);
        for entry in log.events.iter_mut().skip(1) {
            entry.remove("orig_timestamp");
        }
        log
    }

    #[test]
    fn host_segment_uses_task_map_from_its_own_log() {
        let aligner = SessionAlignerBuilder::new(AlignerConfig::default())
            .with_event_logs(vec![
                log_without_task_times(10_000.0, 500.0),
                log(30_000.0, -29_000.0),
            ])
            .build(task_events(&[31_000]))
            .expect("aligner");
        assert_eq!(aligner.task_fits().len(), 1);
        assert_eq!(aligner.host_fits().len(), 2);

        let mut stim = Event::new("STIM_ON", UNSET);
        stim.host_time = Some(HOST_SHIFT_MS + 35_000.0);
        let mstime = aligner.stim_event_to_mstime(&stim).unwrap();
        assert!((mstime - 35_000.0).abs() < 1e-6);

        // The first log has no task map to pair with its host segment.
        stim.host_time = Some(HOST_SHIFT_MS + 15_000.0);
        assert!(matches!(
            aligner.stim_event_to_mstime(&stim),
            Err(AlignmentError::InsufficientData { .. })
        ));
    }

    #[test]
    fn recording_in_log_without_task_map_is_an_error() {
        let aligner = SessionAlignerBuilder::new(AlignerConfig::default())
            .with_event_logs(vec![
                log_without_task_times(10_000.0, 500.0),
                log(30_000.0, -29_000.0),
            ])
            .with_recordings(vec![
                RecordingSource {
                    name: "first".to_string(),
                    start_time_ms: HOST_SHIFT_MS + 9_500.0,
                },
                RecordingSource {
                    name: "second".to_string(),
                    start_time_ms: HOST_SHIFT_MS + 29_000.0,
                },
            ])
            .build(task_events(&[31_000]))
            .expect("aligner");
        let mut out = aligner.events().to_vec();
        let err = aligner.apply_recording_labels(&mut out).unwrap_err();
        assert!(matches!(err, AlignmentError::InsufficientData { .. }));
    }

    #[test]
    fn stim_merge_ignores_untimed_events() {
        let mut events = task_events(&[11_000, 13_000, 15_000]);
        let mut untimed = Event::new("STIM_OFF", UNSET);
        untimed.eegoffset = 16_500;
        events.push(untimed);
        let mut aligner = single_log_aligner(events);
        let mut stim = Event::new("STIM_ON", UNSET);
        stim.host_time = Some(HOST_SHIFT_MS + 17_000.0);
        let merged = aligner.add_stim_events(vec![stim]).unwrap();
        let types: Vec<&str> = merged.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["WORD", "WORD", "WORD", "STIM_OFF", "STIM_ON"]);

        let mut early = Event::new("STIM_ON", UNSET);
        early.host_time = Some(HOST_SHIFT_MS + 12_000.0);
        let merged = aligner.add_stim_events(vec![early]).unwrap();
        let types: Vec<&str> = merged.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["WORD", "STIM_ON", "WORD", "WORD", "STIM_OFF"]);
    }

    #[test]
    fn report_lists_task_and_host_segments() {
        let aligner = single_log_aligner(task_events(&[12_000]));
        let out = aligner.run(None).unwrap();
        let report = aligner.report(&out);
        assert_eq!(report.variant, "segmented");
        assert_eq!(report.segments.len(), 2);
        assert_eq!(report.counts.with_offset, 1);
    }

    #[test]
    fn identity_clock_copies_times_across() {
        let mut events = task_events(&[100, 200]);
        let mut untimed = Event::new("X", UNSET);
        untimed.eegoffset = 300;
        events.push(untimed);
        align_events(&mut events, &IdentityClock, None).unwrap();
        let pairs: Vec<(i64, i64)> = events.iter().map(|e| (e.mstime, e.eegoffset)).collect();
        assert_eq!(pairs, vec![(100, 100), (200, 200), (300, 300)]);
    }
}
