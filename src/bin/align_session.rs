use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use pulse_align::alignment::calibration::RecordingPulses;
use pulse_align::alignment::pulses::{
    load_task_pulses, pick_sync_file, recording_roots, DeviceParams, DevicePulses,
};
use pulse_align::{
    align_recordings, AlignerConfig, AlignmentReport, ClockKind, Event, JsonFitSink,
    SessionAlignerBuilder,
};

#[path = "align_session/json_report_formatter.rs"]
mod json_report_formatter;

const PARAMS_FILE: &str = "params.txt";

#[derive(Debug, Parser)]
#[command(name = "align_session")]
#[command(about = "Align task events with physiological recordings")]
struct Args {
    /// JSON file overriding the aligner defaults.
    #[arg(long, env = "PULSE_ALIGN_CONFIG")]
    config: Option<PathBuf>,
    /// JSON array of task events.
    #[arg(long, env = "PULSE_ALIGN_EVENTS")]
    events: PathBuf,
    #[arg(long, env = "PULSE_ALIGN_OUT")]
    out: PathBuf,
    #[arg(long, env = "PULSE_ALIGN_REPORT")]
    report: Option<PathBuf>,
    #[arg(short, long, env = "PULSE_ALIGN_VERBOSE", default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Match sync pulse trains between the task computer and each recording.
    Pulses {
        /// Behavioral pulse logs; a listed `.up` log is preferred.
        #[arg(long = "task-log", required = true, num_args = 1..)]
        task_logs: Vec<PathBuf>,
        /// Directory with the split channel files and `params.txt`.
        #[arg(long, env = "PULSE_ALIGN_RECORDING_DIR")]
        recording_dir: PathBuf,
    },
    /// Fit hardware event logs that carry task, host and recording times.
    Segments {
        #[arg(long = "event-log", required = true, num_args = 1..)]
        event_logs: Vec<PathBuf>,
        /// Recording manifest: name -> { "start_time_ms": ... }.
        #[arg(long, env = "PULSE_ALIGN_SOURCES")]
        sources: Option<PathBuf>,
        /// JSON array of stim events carrying `host_time`.
        #[arg(long)]
        stim_events: Option<PathBuf>,
        /// Event type marking the session start.
        #[arg(long)]
        start_type: Option<String>,
        #[arg(long, default_value_t = false)]
        shared_host_clock: bool,
        /// Write every segment fit as JSON into this directory.
        #[arg(long, env = "PULSE_ALIGN_FIT_DUMP_DIR")]
        fit_dump_dir: Option<PathBuf>,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = match &args.config {
        Some(path) => AlignerConfig::load(path)
            .map_err(|err| format!("Failed to load config '{}': {err}", path.display()))?,
        None => AlignerConfig::default(),
    };
    let events = load_events(&args.events)?;

    let (command, events, report) = match args.command {
        Command::Pulses {
            task_logs,
            recording_dir,
        } => {
            let mut events = events;
            let report = run_pulses(&mut events, &task_logs, &recording_dir, &config)?;
            ("pulses", events, report)
        }
        Command::Segments {
            event_logs,
            sources,
            stim_events,
            start_type,
            shared_host_clock,
            fit_dump_dir,
        } => {
            let mut builder = SessionAlignerBuilder::new(config)
                .with_log_paths(event_logs)
                .shared_host_clock(shared_host_clock);
            if let Some(path) = sources {
                builder = builder.with_manifest_path(path);
            }
            if let Some(dir) = fit_dump_dir {
                builder = builder.with_fit_sink(Arc::new(JsonFitSink::new(dir)));
            }
            let mut aligner = builder
                .build(events)
                .map_err(|err| format!("Failed to build session aligner: {err}"))?;
            if let Some(path) = stim_events {
                let stim = load_events(&path)?;
                aligner
                    .add_stim_events(stim)
                    .map_err(|err| format!("Failed to merge stim events: {err}"))?;
            }
            let aligned = aligner
                .run(start_type.as_deref())
                .map_err(|err| format!("Failed to align events: {err}"))?;
            let report = aligner.report(&aligned);
            ("segments", aligned, report)
        }
    };

    json_report_formatter::write_events(&args.out, &events)?;
    if let Some(path) = &args.report {
        json_report_formatter::write_report(path, command, &report)?;
    }
    tracing::info!(
        command,
        events = report.counts.total,
        with_offset = report.counts.with_offset,
        out = %args.out.display(),
        "alignment finished"
    );
    Ok(())
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .init();
}

fn load_events(path: &Path) -> Result<Vec<Event>, String> {
    let data = fs::read_to_string(path)
        .map_err(|err| format!("Failed to read events '{}': {err}", path.display()))?;
    serde_json::from_str(&data)
        .map_err(|err| format!("Failed to parse events '{}': {err}", path.display()))
}

fn run_pulses(
    events: &mut [Event],
    task_logs: &[PathBuf],
    recording_dir: &Path,
    config: &AlignerConfig,
) -> Result<AlignmentReport, String> {
    let task_ms = load_task_pulses(task_logs)
        .map_err(|err| format!("Failed to load behavioral pulses: {err}"))?;
    let params_path = recording_dir.join(PARAMS_FILE);
    let params = DeviceParams::load(&params_path)
        .map_err(|err| format!("Failed to load '{}': {err}", params_path.display()))?;

    let mut files: Vec<PathBuf> = fs::read_dir(recording_dir)
        .map_err(|err| format!("Failed to list '{}': {err}", recording_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    files.sort();

    let roots = recording_roots(&files);
    if roots.is_empty() {
        return Err(format!(
            "No sync channel files in '{}'",
            recording_dir.display()
        ));
    }

    let mut recordings = Vec::with_capacity(roots.len());
    for root in roots {
        let Some(sync_file) = pick_sync_file(&files, &root) else {
            continue;
        };
        let pulses = DevicePulses::load(sync_file, &params, config.refractory_ms)
            .map_err(|err| format!("Failed to read '{}': {err}", sync_file.display()))?;
        tracing::info!(
            recording = root.as_str(),
            sync_file = %sync_file.display(),
            pulses = pulses.ms.len(),
            "loaded sync pulses"
        );
        recordings.push(RecordingPulses {
            name: root,
            pulses,
            sample_rate: params.sample_rate,
        });
    }

    let reports = align_recordings(events, &task_ms, &recordings, config);
    Ok(AlignmentReport::new(ClockKind::PulseTrain.as_str(), events).with_recordings(reports))
}
