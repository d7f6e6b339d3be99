use crate::error::AlignmentError;
use crate::types::{Event, RecordingSource, UNSET};

/// Label every event with the recording that was running at its task time.
///
/// `task_start` gives a recording's start expressed in task milliseconds.
/// Recordings are visited in order of host start time and each one relabels
/// everything from its start onward, so an event ends up with the latest
/// recording that began at or before it. A single recording skips the
/// search and claims every event that already has a sample offset.
pub fn apply_recording_labels<F>(
    events: &mut [Event],
    recordings: &[RecordingSource],
    task_start: F,
) -> Result<(), AlignmentError>
where
    F: Fn(&RecordingSource) -> Result<f64, AlignmentError>,
{
    if let [only] = recordings {
        label_aligned_events(events, &only.name);
        return Ok(());
    }

    let mut ordered: Vec<&RecordingSource> = recordings.iter().collect();
    ordered.sort_by(|a, b| a.start_time_ms.total_cmp(&b.start_time_ms));

    for recording in ordered {
        let start = task_start(recording)?;
        let mut labeled = 0usize;
        for event in events
            .iter_mut()
            .filter(|e| e.mstime != UNSET && e.mstime as f64 >= start)
        {
            event.eegfile = recording.name.clone();
            labeled += 1;
        }
        tracing::debug!(
            recording = recording.name.as_str(),
            task_start_ms = start,
            labeled,
            "assemble: labeled events from recording start"
        );
    }
    Ok(())
}

/// Give `name` to every event with a sample offset.
pub fn label_aligned_events(events: &mut [Event], name: &str) {
    for event in events.iter_mut().filter(|e| e.eegoffset >= 0) {
        event.eegfile = name.to_string();
    }
}
