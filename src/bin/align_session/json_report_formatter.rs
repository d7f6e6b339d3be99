use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use pulse_align::{AlignmentReport, Event};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ReportFile<'a> {
    generated_at: String,
    command: &'a str,
    #[serde(flatten)]
    report: &'a AlignmentReport,
}

pub fn write_report(path: &Path, command: &str, report: &AlignmentReport) -> Result<(), String> {
    let file = ReportFile {
        generated_at: Utc::now().to_rfc3339(),
        command,
        report,
    };
    write_pretty(path, "report", &file)
}

pub fn write_events(path: &Path, events: &[Event]) -> Result<(), String> {
    write_pretty(path, "events", &events)
}

fn write_pretty<T: Serialize + ?Sized>(path: &Path, what: &str, value: &T) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| {
            format!(
                "Failed to create {what} output directory '{}': {err}",
                parent.display()
            )
        })?;
    }

    let mut file = File::create(path)
        .map_err(|err| format!("Failed to create {what} file '{}': {err}", path.display()))?;
    serde_json::to_writer_pretty(&mut file, value).map_err(|err| {
        format!(
            "Failed to serialize {what} JSON '{}': {err}",
            path.display()
        )
    })?;
    file.write_all(b"\n")
        .map_err(|err| format!("Failed to finalize {what} file '{}': {err}", path.display()))?;
    Ok(())
}
