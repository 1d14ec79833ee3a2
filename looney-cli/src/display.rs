//! # Console Display Module
//!
//! Turns session events into console lines, including a text cent meter
//! from -50 to +50 cents.

use looney_core::{AnalysisResult, SessionState, Spectrum, TunerEvent};

/// The meter spans -50..=+50 cents.
const METER_RANGE: f32 = 50.0;
/// Character cells in the meter, centre included.
const METER_WIDTH: usize = 21;
/// Deviation still reported as in tune.
const IN_TUNE_CENTS: f32 = 5.0;
/// Deviation reported as slightly off.
const CLOSE_CENTS: f32 = 20.0;

/// Lines to print for one event. `peaks` > 0 adds a spectrum summary.
pub fn render_event(event: &TunerEvent, peaks: usize) -> Vec<String> {
    match event {
        TunerEvent::StateChanged(SessionState::Listening) => vec!["Listening...".to_string()],
        TunerEvent::StateChanged(SessionState::Idle) => vec!["Stopped listening.".to_string()],
        TunerEvent::Analysis(result) => {
            let mut lines = vec![analysis_line(result)];
            if peaks > 0 && !result.spectrum.is_empty() {
                lines.push(peaks_line(&result.spectrum, peaks));
            }
            lines
        }
        TunerEvent::Gap { error, .. } => vec![format!("(no audio: {error})")],
        TunerEvent::Error(err) => vec![format!("Error: {err}")],
    }
}

fn analysis_line(result: &AnalysisResult) -> String {
    match &result.note {
        Some(note) => format!(
            "{} {} {}",
            result.summary(),
            cent_meter(note.cents),
            verdict(note.cents)
        ),
        None => result.summary(),
    }
}

fn peaks_line(spectrum: &Spectrum, count: usize) -> String {
    let peaks: Vec<String> = spectrum
        .top_peaks(count)
        .iter()
        .map(|bin| format!("{:.1} Hz ({:.1})", bin.frequency, bin.magnitude))
        .collect();
    format!("  Peaks: {}", peaks.join(", "))
}

/// Needle position on a fixed-width bar; out-of-range values pin to the ends.
pub fn cent_meter(cents: f32) -> String {
    let clamped = cents.clamp(-METER_RANGE, METER_RANGE);
    let slots = METER_WIDTH - 1;
    let needle = ((clamped + METER_RANGE) / (2.0 * METER_RANGE) * slots as f32).round() as usize;
    let centre = slots / 2;

    let bar: String = (0..METER_WIDTH)
        .map(|i| {
            if i == needle {
                '*'
            } else if i == centre {
                '|'
            } else {
                '-'
            }
        })
        .collect();
    format!("[{bar}]")
}

/// Coarse tuning advice for a deviation.
pub fn verdict(cents: f32) -> &'static str {
    let off = cents.abs();
    if off < IN_TUNE_CENTS {
        "in tune"
    } else if off < CLOSE_CENTS {
        if cents < 0.0 { "slightly flat" } else { "slightly sharp" }
    } else if cents < 0.0 {
        "flat"
    } else {
        "sharp"
    }
}
