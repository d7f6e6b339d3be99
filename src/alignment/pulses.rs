use std::path::{Path, PathBuf};

use crate::error::AlignmentError;

/// Sync channel extensions in order of preference.
pub const SYNC_CHANNEL_EXTENSIONS: [&str; 4] = ["Status", "D255", "DI15", "DIN1"];

/// Markers for an "up" edge in a behavioral pulse log.
const UP_MARKERS: [&str; 3] = ["CHANNEL_0_UP", "UP", "ON"];

const UP_CACHE_EXTENSION: &str = "up";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Int16,
    Int32,
    Float32,
}

impl SampleFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim_matches(|c| c == '\'' || c == '"') {
            "int16" | "short" => Some(Self::Int16),
            "int32" | "int" => Some(Self::Int32),
            "float32" | "single" => Some(Self::Float32),
            _ => None,
        }
    }

    fn width(self) -> usize {
        match self {
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 => 4,
        }
    }

    fn decode(self, bytes: &[u8]) -> f64 {
        match self {
            Self::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
            Self::Int32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            Self::Float32 => f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
        }
    }
}

/// Recording parameters written next to the split channel files.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceParams {
    pub sample_rate: u32,
    pub data_format: SampleFormat,
    pub system: String,
}

impl DeviceParams {
    pub fn load(path: &Path) -> Result<Self, AlignmentError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AlignmentError::io("read recording params", e))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, AlignmentError> {
        let mut sample_rate = None;
        let mut data_format = None;
        let mut system = String::new();
        for line in text.lines() {
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            match key {
                "samplerate" => {
                    let rate: f64 = value.parse().map_err(|_| {
                        AlignmentError::invalid_input(format!("bad samplerate `{value}`"))
                    })?;
                    sample_rate = Some(rate.round() as u32);
                }
                "dataformat" => data_format = SampleFormat::parse(value),
                "system" => system = value.to_string(),
                _ => {}
            }
        }
        match (sample_rate, data_format) {
            (Some(rate), Some(format)) if rate > 0 => Ok(Self {
                sample_rate: rate,
                data_format: format,
                system,
            }),
            _ => Err(AlignmentError::invalid_input(
                "recording params need a positive samplerate and a known dataformat",
            )),
        }
    }
}

/// Pulses detected on a device sync channel.
#[derive(Debug, Clone, PartialEq)]
pub struct DevicePulses {
    /// Sample index of the first sample of each pulse.
    pub positions: Vec<usize>,
    /// Pulse times in whole milliseconds since the start of the recording.
    pub ms: Vec<i64>,
    /// Total number of samples in the channel.
    pub num_samples: usize,
}

impl DevicePulses {
    pub fn from_samples(samples: &[f64], sample_rate: u32, refractory_ms: i64) -> Self {
        let raw: Vec<usize> = samples
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v > 0.0)
            .map(|(i, _)| i)
            .collect();
        let raw_ms: Vec<i64> = raw
            .iter()
            .map(|&i| (i as u64 * 1000 / sample_rate.max(1) as u64) as i64)
            .collect();

        // A sample is dropped when it follows the previous raw sample too closely,
        // leaving only the leading edge of each multi-sample pulse.
        let mut positions = Vec::with_capacity(raw.len());
        let mut ms = Vec::with_capacity(raw.len());
        for (k, (&pos, &t)) in raw.iter().zip(&raw_ms).enumerate() {
            if k > 0 && t - raw_ms[k - 1] < refractory_ms {
                continue;
            }
            positions.push(pos);
            ms.push(t);
        }

        Self {
            positions,
            ms,
            num_samples: samples.len(),
        }
    }

    pub fn load(
        path: &Path,
        params: &DeviceParams,
        refractory_ms: i64,
    ) -> Result<Self, AlignmentError> {
        let samples = read_sync_channel(path, params.data_format)?;
        Ok(Self::from_samples(&samples, params.sample_rate, refractory_ms))
    }
}

pub fn read_sync_channel(path: &Path, format: SampleFormat) -> Result<Vec<f64>, AlignmentError> {
    let bytes = std::fs::read(path).map_err(|e| AlignmentError::io("read sync channel", e))?;
    let width = format.width();
    if bytes.len() % width != 0 {
        tracing::warn!(
            path = %path.display(),
            trailing_bytes = bytes.len() % width,
            "sync channel length is not a whole number of samples"
        );
    }
    Ok(bytes.chunks_exact(width).map(|b| format.decode(b)).collect())
}

/// Unique recording root names among sync channel files, in first-seen order.
pub fn recording_roots(files: &[PathBuf]) -> Vec<String> {
    let mut roots: Vec<String> = Vec::new();
    for f in files {
        let is_sync = f
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SYNC_CHANNEL_EXTENSIONS.contains(&e));
        if !is_sync {
            continue;
        }
        if let Some(stem) = f.file_stem().and_then(|s| s.to_str()) {
            if !roots.iter().any(|r| r == stem) {
                roots.push(stem.to_string());
            }
        }
    }
    roots
}

/// Pick the preferred sync channel for one recording.
pub fn pick_sync_file<'a>(files: &'a [PathBuf], root: &str) -> Option<&'a PathBuf> {
    SYNC_CHANNEL_EXTENSIONS.iter().find_map(|ext| {
        files.iter().find(|f| {
            f.file_stem().and_then(|s| s.to_str()) == Some(root)
                && f.extension().and_then(|e| e.to_str()) == Some(*ext)
        })
    })
}

/// Running state while scanning a raw behavioral pulse log.
#[derive(Debug, Default)]
struct UpPulseScan {
    rows: Vec<String>,
    times: Vec<i64>,
}

impl UpPulseScan {
    fn scan(mut self, (line_no, line): (usize, &str)) -> Result<Self, AlignmentError> {
        let cols: Vec<&str> = line.split_whitespace().take(3).collect();
        if cols.len() < 3 || !UP_MARKERS.contains(&cols[2]) {
            return Ok(self);
        }
        let t: i64 = cols[0].parse().map_err(|_| {
            AlignmentError::invalid_input(format!(
                "pulse log line {}: `{}` is not an integer time",
                line_no + 1,
                cols[0]
            ))
        })?;
        self.rows.push(cols.join(" "));
        self.times.push(t);
        Ok(self)
    }
}

/// Pull "up" pulses out of a raw behavioral pulse log (header line skipped).
/// Returns the pulse times and the rows to cache.
fn scan_up_pulses(text: &str) -> Result<(Vec<i64>, Vec<String>), AlignmentError> {
    let scan = text
        .lines()
        .enumerate()
        .skip(1)
        .try_fold(UpPulseScan::default(), UpPulseScan::scan)?;
    Ok((scan.times, scan.rows))
}

/// First-column integer times of an already-derived `.up` log.
pub fn read_up_pulses(path: &Path) -> Result<Vec<i64>, AlignmentError> {
    let text =
        std::fs::read_to_string(path).map_err(|e| AlignmentError::io("read up-pulse log", e))?;
    text.lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(|first| {
            first.parse::<i64>().map_err(|_| {
                AlignmentError::invalid_input(format!("`{first}` is not an integer pulse time"))
            })
        })
        .collect()
}

pub fn up_cache_path(log: &Path) -> PathBuf {
    let mut name = log.as_os_str().to_owned();
    name.push(".");
    name.push(UP_CACHE_EXTENSION);
    PathBuf::from(name)
}

/// Extract up pulses from a raw log and cache them as `<log>.up`.
///
/// An existing cache is read instead of being regenerated.
pub fn extract_up_pulses(log: &Path) -> Result<Vec<i64>, AlignmentError> {
    let cache = up_cache_path(log);
    if cache.exists() {
        tracing::debug!(cache = %cache.display(), "reusing derived up-pulse log");
        return read_up_pulses(&cache);
    }

    let text =
        std::fs::read_to_string(log).map_err(|e| AlignmentError::io("read raw pulse log", e))?;
    let (times, rows) = scan_up_pulses(&text)?;
    let mut out = rows.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    std::fs::write(&cache, out).map_err(|e| AlignmentError::io("write up-pulse log", e))?;
    tracing::debug!(cache = %cache.display(), pulses = times.len(), "derived up-pulse log");
    Ok(times)
}

/// Task clock pulse times for a session: an `.up` log when one is listed,
/// otherwise pulses derived from the first raw log.
pub fn load_task_pulses(logs: &[PathBuf]) -> Result<Vec<i64>, AlignmentError> {
    let up = logs
        .iter()
        .find(|p| p.extension().and_then(|e| e.to_str()) == Some(UP_CACHE_EXTENSION));
    if let Some(up) = up {
        return read_up_pulses(up);
    }
    let first = logs
        .first()
        .ok_or_else(|| AlignmentError::invalid_input("no behavioral pulse log given"))?;
    tracing::debug!(log = %first.display(), "no up-pulse log listed, extracting from raw log");
    extract_up_pulses(first)
}
