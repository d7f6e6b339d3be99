use std::env;
use std::ops::Range;

use libtest_mimic::{Arguments, Failed, Trial};
use pulse_align::alignment::calibration::RecordingPulses;
use pulse_align::alignment::pulses::DevicePulses;
use pulse_align::{
    align_recordings, AlignerConfig, ClockTranslator, Event, PulseTrainClock, UNSET,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const DEFAULT_CASES: u64 = 8;
const DEFAULT_DELTA_SAMPLES: f64 = 3.0;
const DEFAULT_SEED: u64 = 42;
const SUITE_NAME: &str = "synthetic_pulse_sessions_align_within_delta";

const SAMPLE_RATE: u32 = 500;
const TASK_PULSES: usize = 300;
const PULSE_WIDTH_SAMPLES: usize = 3;
const TAIL_SAMPLES: usize = 1_000;
const EVENTS_PER_RECORDING: usize = 50;

fn main() {
    let args = Arguments::from_args();
    let seed = env_u64("PULSE_ALIGN_IT_SEED", DEFAULT_SEED);
    let cases = env_u64("PULSE_ALIGN_IT_CASES", DEFAULT_CASES);
    let delta = env_f64("PULSE_ALIGN_IT_DELTA_SAMPLES", DEFAULT_DELTA_SAMPLES);

    let mut tests = Vec::new();
    for case in 0..cases {
        let case_seed = seed.wrapping_add(case);
        tests.push(Trial::test(
            format!("{SUITE_NAME}::single_recording::seed_{case_seed}"),
            move || run_single_recording(case_seed, delta).map_err(Failed::from),
        ));
        tests.push(Trial::test(
            format!("{SUITE_NAME}::split_recordings::seed_{case_seed}"),
            move || run_split_recordings(case_seed, delta).map_err(Failed::from),
        ));
    }
    tests.push(Trial::test(
        format!("{SUITE_NAME}::unrelated_recording_is_skipped"),
        move || run_unrelated_recording(seed).map_err(Failed::from),
    ));

    libtest_mimic::run(&args, tests).exit();
}

/// Device-side view of part of the task pulse train.
struct SyntheticRecording {
    name: String,
    slope: f64,
    lead_ms: f64,
    first_task_ms: i64,
    pulses: DevicePulses,
}

impl SyntheticRecording {
    fn capture(rng: &mut StdRng, name: &str, task_ms: &[i64], seen: Range<usize>) -> Self {
        let slope = rng.gen_range(0.9995..1.0005);
        let lead_ms = rng.gen_range(3_000..8_000) as f64;
        let first_task_ms = task_ms[seen.start];

        let positions: Vec<usize> = task_ms[seen]
            .iter()
            .map(|&t| {
                let ideal = slope * (t - first_task_ms) as f64 + lead_ms;
                let jitter = rng.gen_range(-2..=2);
                let device_ms = ideal.round() as i64 + jitter;
                (device_ms as u64 * SAMPLE_RATE as u64 / 1000) as usize
            })
            .collect();
        let last = positions.last().copied().unwrap_or_default();
        let mut samples = vec![0.0; last + TAIL_SAMPLES];
        for &p in &positions {
            for s in &mut samples[p..p + PULSE_WIDTH_SAMPLES] {
                *s = 1.0;
            }
        }

        Self {
            name: name.to_string(),
            slope,
            lead_ms,
            first_task_ms,
            pulses: DevicePulses::from_samples(&samples, SAMPLE_RATE, 100),
        }
    }

    fn expected_offset(&self, task_ms: i64) -> f64 {
        (self.slope * (task_ms - self.first_task_ms) as f64 + self.lead_ms) * SAMPLE_RATE as f64
            / 1000.0
    }

    fn as_input(&self) -> RecordingPulses {
        RecordingPulses {
            name: self.name.clone(),
            pulses: self.pulses.clone(),
            sample_rate: SAMPLE_RATE,
        }
    }
}

fn task_train(rng: &mut StdRng) -> Vec<i64> {
    let mut t = rng.gen_range(1_000_000..2_000_000);
    (0..TASK_PULSES)
        .map(|_| {
            t += rng.gen_range(500..1_500);
            t
        })
        .collect()
}

fn events_between(rng: &mut StdRng, from_ms: i64, to_ms: i64) -> Vec<Event> {
    let mut times: Vec<i64> = (0..EVENTS_PER_RECORDING)
        .map(|_| rng.gen_range(from_ms..=to_ms))
        .collect();
    times.sort_unstable();
    times.into_iter().map(|t| Event::new("WORD", t)).collect()
}

fn check_offsets(
    events: &[Event],
    recording: &SyntheticRecording,
    delta: f64,
) -> Result<(), String> {
    for (i, event) in events.iter().enumerate() {
        if event.eegfile != recording.name {
            return Err(format!(
                "event {i} at {}ms labeled '{}' instead of '{}'",
                event.mstime, event.eegfile, recording.name
            ));
        }
        let expected = recording.expected_offset(event.mstime);
        let diff = (event.eegoffset as f64 - expected).abs();
        if diff > delta {
            return Err(format!(
                "event {i} at {}ms: offset {} is {diff:.2} samples from {expected:.2}",
                event.mstime, event.eegoffset
            ));
        }
    }
    Ok(())
}

fn run_single_recording(seed: u64, delta: f64) -> Result<(), String> {
    let mut rng = StdRng::seed_from_u64(seed);
    let task_ms = task_train(&mut rng);
    let first = rng.gen_range(10..40);
    let last = rng.gen_range(260..290);
    let recording = SyntheticRecording::capture(&mut rng, "session_0", &task_ms, first..last + 1);

    let mut events = events_between(&mut rng, task_ms[first], task_ms[last]);
    let config = AlignerConfig::default();
    let reports = align_recordings(&mut events, &task_ms, &[recording.as_input()], &config);

    let report = &reports[0];
    if !report.aligned || report.out_of_bounds_events != 0 {
        return Err(format!("unexpected recording report: {report:?}"));
    }
    if report.start_index != Some(first) || report.end_index != Some(last + 1 - config.window) {
        return Err(format!(
            "matched windows {:?}..{:?}, expected {first}..{}",
            report.start_index,
            report.end_index,
            last + 1 - config.window
        ));
    }
    check_offsets(&events, &recording, delta)?;

    // The clock form of the same fit agrees with the batch offsets.
    let mut clock = PulseTrainClock::new(
        task_ms.clone(),
        recording.pulses.ms.clone(),
        SAMPLE_RATE,
        &config,
    );
    clock.calibrate().map_err(|err| err.to_string())?;
    for event in &events {
        let forward = clock
            .translate(event.mstime as f64, false)
            .ok_or_else(|| "calibrated clock returned nothing".to_string())?;
        if (forward.round() as i64 - event.eegoffset).abs() > 1 {
            return Err(format!(
                "clock offset {forward:.2} disagrees with {} at {}ms",
                event.eegoffset, event.mstime
            ));
        }
        let back = clock
            .translate(forward, true)
            .ok_or_else(|| "calibrated clock returned nothing".to_string())?;
        if (back - event.mstime as f64).abs() > 1e-6 {
            return Err(format!("round trip of {}ms gave {back}", event.mstime));
        }
    }
    Ok(())
}

fn run_split_recordings(seed: u64, delta: f64) -> Result<(), String> {
    let mut rng = StdRng::seed_from_u64(seed ^ 0x5eed);
    let task_ms = task_train(&mut rng);
    let first = rng.gen_range(10..40);
    let last = rng.gen_range(260..290);
    let a = SyntheticRecording::capture(&mut rng, "a", &task_ms, first..150);
    let b = SyntheticRecording::capture(&mut rng, "b", &task_ms, 160..last + 1);

    let events_a = events_between(&mut rng, task_ms[first], task_ms[149]);
    let events_b = events_between(&mut rng, task_ms[165], task_ms[last]);
    let mut events: Vec<Event> = events_a.into_iter().chain(events_b).collect();

    let reports = align_recordings(
        &mut events,
        &task_ms,
        &[a.as_input(), b.as_input()],
        &AlignerConfig::default(),
    );
    if reports.iter().any(|r| !r.aligned) {
        return Err(format!("a recording failed to align: {reports:?}"));
    }
    if reports[0].assigned_events != EVENTS_PER_RECORDING
        || reports[1].assigned_events != EVENTS_PER_RECORDING
    {
        return Err(format!("events split unevenly: {reports:?}"));
    }
    check_offsets(&events[..EVENTS_PER_RECORDING], &a, delta)?;
    check_offsets(&events[EVENTS_PER_RECORDING..], &b, delta)
}

fn run_unrelated_recording(seed: u64) -> Result<(), String> {
    let mut rng = StdRng::seed_from_u64(seed.wrapping_mul(31));
    let task_ms = task_train(&mut rng);
    let other_session = task_train(&mut rng);
    let stranger = SyntheticRecording::capture(&mut rng, "stranger", &other_session, 0..TASK_PULSES);

    let mut events = events_between(&mut rng, task_ms[0], task_ms[TASK_PULSES - 1]);
    let reports = align_recordings(
        &mut events,
        &task_ms,
        &[stranger.as_input()],
        &AlignerConfig::default(),
    );
    if reports[0].aligned {
        return Err("an unrelated pulse train was matched".to_string());
    }
    if events.iter().any(|e| e.eegoffset != UNSET || !e.eegfile.is_empty()) {
        return Err("events were modified by a failed recording".to_string());
    }
    Ok(())
}

fn env_f64(name: &str, default: f64) -> f64 {
    match env::var(name) {
        Ok(value) => value.trim().parse::<f64>().unwrap_or_else(|err| {
            panic!(
                "Invalid value for {}='{}' (expected f64): {}",
                name, value, err
            )
        }),
        Err(_) => default,
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(value) => value.trim().parse::<u64>().unwrap_or_else(|err| {
            panic!(
                "Invalid value for {}='{}' (expected u64): {}",
                name, value, err
            )
        }),
        Err(_) => default,
    }
}
