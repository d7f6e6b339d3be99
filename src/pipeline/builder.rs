use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::alignment::segments::{attach_residuals, SegmentLog};
use crate::config::AlignerConfig;
use crate::error::AlignmentError;
use crate::pipeline::defaults::{ClockKind, NullFitSink, SegmentedClock};
use crate::pipeline::runtime::{SessionAligner, SessionAlignerParts};
use crate::pipeline::traits::{ClockTranslator, FitSink};
use crate::types::{Event, RecordingSource};

pub struct SessionAlignerBuilder {
    config: AlignerConfig,
    event_logs: Vec<SegmentLog>,
    log_paths: Vec<PathBuf>,
    fit_sink: Option<Arc<dyn FitSink>>,
    recordings: Vec<RecordingSource>,
    manifest_path: Option<PathBuf>,
    shared_host_clock: bool,
}

impl SessionAlignerBuilder {
    pub fn new(config: AlignerConfig) -> Self {
        Self {
            config,
            event_logs: Vec::new(),
            log_paths: Vec::new(),
            fit_sink: None,
            recordings: Vec::new(),
            manifest_path: None,
            shared_host_clock: false,
        }
    }

    pub fn with_event_logs(mut self, event_logs: Vec<SegmentLog>) -> Self {
        self.event_logs.extend(event_logs);
        self
    }

    /// Event logs read at build time, after any in-memory logs.
    pub fn with_log_paths(mut self, log_paths: Vec<PathBuf>) -> Self {
        self.log_paths.extend(log_paths);
        self
    }

    pub fn with_fit_sink(mut self, fit_sink: Arc<dyn FitSink>) -> Self {
        self.fit_sink = Some(fit_sink);
        self
    }

    pub fn with_recordings(mut self, recordings: Vec<RecordingSource>) -> Self {
        self.recordings.extend(recordings);
        self
    }

    /// JSON object mapping recording name to `{ "start_time_ms": ... }`.
    pub fn with_manifest_path(mut self, manifest_path: impl Into<PathBuf>) -> Self {
        self.manifest_path = Some(manifest_path.into());
        self
    }

    /// The task runs on the host clock, so task times use the host map.
    pub fn shared_host_clock(mut self, shared: bool) -> Self {
        self.shared_host_clock = shared;
        self
    }

    pub fn build(self, mut events: Vec<Event>) -> Result<SessionAligner, AlignmentError> {
        self.config.validate()?;

        let mut logs = self.event_logs;
        for path in &self.log_paths {
            logs.push(SegmentLog::load(path)?);
        }
        if logs.is_empty() {
            return Err(AlignmentError::insufficient(
                "build session aligner",
                "no event logs were provided",
            ));
        }
        let logs: Arc<[SegmentLog]> = logs.into();

        let mut recordings = self.recordings;
        if let Some(path) = &self.manifest_path {
            recordings.extend(load_manifest(path)?);
        }

        let sink = self.fit_sink.unwrap_or_else(|| Arc::new(NullFitSink));
        let config = self.config;

        let mut task_clock = SegmentedClock::new(
            Arc::clone(&logs),
            config.source_label.clone(),
            config.source_rate,
            config.clone(),
            Arc::clone(&sink),
        );
        match task_clock.calibrate() {
            Ok(()) => {
                for fit in task_clock.fits() {
                    attach_residuals(&mut events, fit);
                }
            }
            Err(err @ AlignmentError::InsufficientData { .. }) if self.shared_host_clock => {
                tracing::warn!(
                    label = config.source_label.as_str(),
                    error = %err,
                    "task clock label unusable; relying on the host clock"
                );
            }
            Err(err) => return Err(err),
        }

        let host_clock = calibrate_host_clock(&logs, &config, &sink)?;
        let (task_clock, kind) = if self.shared_host_clock {
            (host_clock.clone(), ClockKind::SharedHostClock)
        } else {
            (task_clock, ClockKind::Segmented)
        };

        tracing::debug!(
            kind = kind.as_str(),
            logs = logs.len(),
            task_segments = task_clock.fits().len(),
            host_label = host_clock.source_label(),
            host_segments = host_clock.fits().len(),
            recordings = recordings.len(),
            "built session aligner"
        );

        Ok(SessionAligner::from_parts(SessionAlignerParts {
            events,
            task_clock,
            host_clock,
            recordings,
            config,
            kind,
        }))
    }
}

/// Try each host label in turn; a label without enough data falls through
/// to the next one.
fn calibrate_host_clock(
    logs: &Arc<[SegmentLog]>,
    config: &AlignerConfig,
    sink: &Arc<dyn FitSink>,
) -> Result<SegmentedClock, AlignmentError> {
    for label in &config.host_labels {
        let mut clock = SegmentedClock::new(
            Arc::clone(logs),
            label.clone(),
            config.host_rate,
            config.clone(),
            Arc::clone(sink),
        );
        match clock.calibrate() {
            Ok(()) => return Ok(clock),
            Err(err) if err.is_recoverable() => {
                tracing::debug!(label = label.as_str(), error = %err, "no coefficients for host label");
            }
            Err(err) => return Err(err),
        }
    }
    Err(AlignmentError::insufficient(
        "find an alignable host label",
        format!("tried {}", config.host_labels.join(", ")),
    ))
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    start_time_ms: f64,
}

fn load_manifest(path: &Path) -> Result<Vec<RecordingSource>, AlignmentError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| AlignmentError::io("read recording manifest", e))?;
    let raw: BTreeMap<String, ManifestEntry> = serde_json::from_str(&data)
        .map_err(|e| AlignmentError::json("parse recording manifest", e))?;
    Ok(raw
        .into_iter()
        .map(|(name, entry)| RecordingSource {
            name,
            start_time_ms: entry.start_time_ms,
        })
        .collect())
}
