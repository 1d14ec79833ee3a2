//! # Musical Tuning Module
//!
//! This module maps frequencies to equal-tempered notes for the tuner.
//!
//! ## Features
//! - Formula-based nearest-note search relative to a reference A4 (440 Hz
//!   by default), with extrapolation beyond the guitar range
//! - Signed cents deviation for tuning feedback
//! - A fixed 49-note reference table (E2 to E6), the guitar tuner's
//!   range, with the table's clamping nearest-neighbour lookup

use crate::config::DEFAULT_REFERENCE_PITCH;
use once_cell::sync::Lazy;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

const FLAT_NAMES: [Option<&str>; 12] = [
    None,
    Some("Db"),
    None,
    Some("Eb"),
    None,
    None,
    Some("Gb"),
    None,
    Some("Ab"),
    None,
    Some("Bb"),
    None,
];

/// MIDI number of A4.
const A4_MIDI: i32 = 69;

/// MIDI numbers of the reference table's ends, E2 and E6.
const TABLE_LOW_MIDI: i32 = 40;
const TABLE_HIGH_MIDI: i32 = 88;

/// How close to exactly half a semitone counts as a tie.
const TIE_EPSILON: f64 = 1e-4;

/// The nearest equal-tempered note to a measured frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteMatch {
    /// Note name with octave, e.g. "A4" or "C#3".
    pub name: String,
    /// Pitch class without octave, e.g. "C#".
    pub pitch_class: &'static str,
    /// Scientific pitch octave (C4 is middle C).
    pub octave: i32,
    pub midi_number: i32,
    /// Exact frequency of the note in Hz.
    pub reference_frequency: f32,
    /// Signed deviation from the note; positive is sharp.
    pub cents: f32,
}

impl NoteMatch {
    /// Name with the flat spelling appended for accidentals, e.g. "F#2/Gb2".
    pub fn display_name(&self) -> String {
        enharmonic_name(self.midi_number)
    }

    /// Whether the deviation is within `tolerance_cents` either way.
    pub fn is_in_tune(&self, tolerance_cents: f32) -> bool {
        self.cents.abs() <= tolerance_cents
    }
}

/// Maps frequencies to notes relative to a reference pitch for A4.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteMapper {
    reference_pitch: f32,
}

impl Default for NoteMapper {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_PITCH)
    }
}

impl NoteMapper {
    pub fn new(reference_pitch: f32) -> Self {
        Self { reference_pitch }
    }

    /// Finds the nearest note to `frequency` and the deviation from it.
    ///
    /// The semitone distance from A4 is `12 * log2(f / A4)`; it is rounded to
    /// the nearest integer, with exact quarter-tone ties going to the lower
    /// note. Frequencies outside the guitar range extrapolate.
    ///
    /// # Arguments
    /// * `frequency` - Measured frequency in Hz
    ///
    /// # Returns
    /// * `Some(NoteMatch)` - Note name, octave, exact note frequency and
    ///   signed cents in [-50, +50]
    /// * `None` - If `frequency` is not positive and finite
    pub fn nearest_note(&self, frequency: f32) -> Option<NoteMatch> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return None;
        }

        let reference = self.reference_pitch as f64;
        let raw = 12.0 * (frequency as f64 / reference).log2();
        let nearest = nearest_semitone(raw);
        let midi_number = A4_MIDI + nearest as i32;

        Some(NoteMatch {
            name: note_name(midi_number),
            pitch_class: NOTE_NAMES[midi_number.rem_euclid(12) as usize],
            octave: octave_of(midi_number),
            midi_number,
            reference_frequency: (reference * 2f64.powf(nearest / 12.0)) as f32,
            cents: (100.0 * (raw - nearest)) as f32,
        })
    }

    /// Equal-tempered frequency of a MIDI note under this reference pitch.
    pub fn frequency_of(&self, midi_number: i32) -> f32 {
        (self.reference_pitch as f64 * 2f64.powf((midi_number - A4_MIDI) as f64 / 12.0)) as f32
    }
}

fn nearest_semitone(raw: f64) -> f64 {
    let floor = raw.floor();
    if (raw - floor - 0.5).abs() < TIE_EPSILON {
        floor
    } else {
        raw.round()
    }
}

fn octave_of(midi_number: i32) -> i32 {
    midi_number.div_euclid(12) - 1
}

fn note_name(midi_number: i32) -> String {
    format!(
        "{}{}",
        NOTE_NAMES[midi_number.rem_euclid(12) as usize],
        octave_of(midi_number)
    )
}

fn enharmonic_name(midi_number: i32) -> String {
    let octave = octave_of(midi_number);
    let pitch_class = midi_number.rem_euclid(12) as usize;
    match FLAT_NAMES[pitch_class] {
        Some(flat) => format!("{}{}/{}{}", NOTE_NAMES[pitch_class], octave, flat, octave),
        None => note_name(midi_number),
    }
}

/// One entry of the fixed reference table.
#[derive(Debug, Clone)]
pub struct ReferenceNote {
    /// Note name (e.g., "E2", "F#2")
    pub name: String,
    /// Frequency in Hz at A4 = 440 Hz
    pub frequency: f32,
}

/// The 49 semitones from E2 to E6 at A4 = 440 Hz, computed once.
static REFERENCE_NOTES: Lazy<Vec<ReferenceNote>> = Lazy::new(|| {
    let mapper = NoteMapper::default();
    (TABLE_LOW_MIDI..=TABLE_HIGH_MIDI)
        .map(|midi| ReferenceNote {
            name: note_name(midi),
            frequency: mapper.frequency_of(midi),
        })
        .collect()
});

/// The whole reference table, lowest note first.
pub fn reference_notes() -> &'static [ReferenceNote] {
    &REFERENCE_NOTES
}

/// Closest table entry by absolute frequency difference.
///
/// Frequencies outside E2 to E6 clamp to the nearest end of the table.
/// Returns `None` only for NaN.
pub fn nearest_reference_note(freq: f32) -> Option<&'static ReferenceNote> {
    if freq.is_nan() {
        return None;
    }
    REFERENCE_NOTES.iter().min_by(|a, b| {
        let diff_a = (a.frequency - freq).abs();
        let diff_b = (b.frequency - freq).abs();
        diff_a.total_cmp(&diff_b)
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Hard-coded E2..E6 frequencies the table must reproduce.
    const HARDCODED_TABLE: [f32; 49] = [
        82.41, 87.31, 92.50, 98.00, 103.83, 110.00, 116.54, 123.47, 130.81, 138.59, 146.83, 155.56,
        164.81, 174.61, 185.00, 196.00, 207.65, 220.00, 233.08, 246.94, 261.63, 277.18, 293.66, 311.13,
        329.63, 349.23, 369.99, 392.00, 415.30, 440.00, 466.16, 493.88, 523.25, 554.37, 587.33, 622.25,
        659.25, 698.46, 739.99, 783.99, 830.61, 880.00, 932.33, 987.77, 1046.50, 1108.73, 1174.66, 1244.51,
        1318.51,
    ];

    #[test]
    fn a4_is_exact() {
        let note = NoteMapper::default().nearest_note(440.0).unwrap();
        assert_eq!(note.name, "A4");
        assert_eq!(note.reference_frequency, 440.0);
        assert_eq!(note.cents, 0.0);
        assert_eq!(note.midi_number, 69);
    }

    #[test]
    fn quarter_tone_sharp_stays_on_a4() {
        let freq = 440.0 * 2f32.powf(1.0 / 24.0);
        let note = NoteMapper::default().nearest_note(freq).unwrap();
        assert_eq!(note.name, "A4");
        assert!((note.cents - 50.0).abs() < 0.01, "cents = {}", note.cents);
    }

    #[test]
    fn reference_frequencies_map_to_zero_cents() {
        let mapper = NoteMapper::default();
        for midi in 0..=127 {
            let note = mapper.nearest_note(mapper.frequency_of(midi)).unwrap();
            assert_eq!(note.midi_number, midi);
            assert!(note.cents.abs() < 1e-3, "{} off by {} cents", note.name, note.cents);
        }
    }

    #[test]
    fn names_and_octaves() {
        let mapper = NoteMapper::default();
        let name = |f: f32| mapper.nearest_note(f).unwrap().name;
        assert_eq!(name(82.41), "E2");
        assert_eq!(name(110.0), "A2");
        assert_eq!(name(261.63), "C4");
        assert_eq!(name(246.94), "B3");
        assert_eq!(name(1318.51), "E6");
        assert_eq!(name(16.35), "C0");
    }

    #[test]
    fn extrapolates_beyond_the_table() {
        let mapper = NoteMapper::default();
        assert_eq!(mapper.nearest_note(41.2).unwrap().name, "E1");
        assert_eq!(mapper.nearest_note(2637.02).unwrap().name, "E7");
        assert_eq!(mapper.nearest_note(8.18).unwrap().name, "C-1");

        // The table clamps instead.
        assert_eq!(nearest_reference_note(41.2).unwrap().name, "E2");
        assert_eq!(nearest_reference_note(2637.02).unwrap().name, "E6");
    }

    #[test]
    fn rejects_non_positive_frequencies() {
        let mapper = NoteMapper::default();
        assert_eq!(mapper.nearest_note(0.0), None);
        assert_eq!(mapper.nearest_note(-110.0), None);
        assert_eq!(mapper.nearest_note(f32::NAN), None);
        assert_eq!(mapper.nearest_note(f32::INFINITY), None);
    }

    #[test]
    fn cents_sign_follows_sharpness() {
        let mapper = NoteMapper::default();
        let sharp = mapper.nearest_note(112.0).unwrap();
        let flat = mapper.nearest_note(108.0).unwrap();
        assert_eq!(sharp.name, "A2");
        assert_eq!(flat.name, "A2");
        assert!(sharp.cents > 30.0 && sharp.cents < 32.0);
        assert!(flat.cents < -31.0 && flat.cents > -33.0);
        assert!((sharp.cents - 1200.0 * (112.0_f32 / 110.0).log2()).abs() < 1e-3);
    }

    #[test]
    fn custom_reference_pitch() {
        let mapper = NoteMapper::new(442.0);
        assert_eq!(mapper.nearest_note(442.0).unwrap().cents, 0.0);
        let concert = mapper.nearest_note(440.0).unwrap();
        assert_eq!(concert.name, "A4");
        assert!((concert.cents + 7.85).abs() < 0.01);
    }

    #[test]
    fn table_reproduces_hardcoded_frequencies() {
        let table = reference_notes();
        assert_eq!(table.len(), 49);
        assert_eq!(table[0].name, "E2");
        assert_eq!(table[48].name, "E6");
        for (note, &expected) in table.iter().zip(HARDCODED_TABLE.iter()) {
            assert!(
                (note.frequency - expected).abs() < 0.01,
                "{}: {} vs {}",
                note.name,
                note.frequency,
                expected
            );
        }
        for pair in table.windows(2) {
            let ratio = pair[1].frequency / pair[0].frequency;
            assert!((ratio - 2f32.powf(1.0 / 12.0)).abs() < 1e-5);
        }
    }

    #[test]
    fn formula_agrees_with_table_away_from_midpoints() {
        let mapper = NoteMapper::default();
        for note in reference_notes() {
            for offset in [-40.0f32, -15.0, 0.0, 15.0, 40.0] {
                let freq = note.frequency * 2f32.powf(offset / 1200.0);
                let from_formula = mapper.nearest_note(freq).unwrap();
                let from_table = nearest_reference_note(freq).unwrap();
                // Outside the table the lookup clamps, so skip the ends' outer side.
                if freq < reference_notes()[0].frequency || freq > reference_notes()[48].frequency {
                    continue;
                }
                assert_eq!(from_formula.name, from_table.name);
            }
        }
    }

    #[test]
    fn formula_and_table_disagree_between_midpoints() {
        // Above A4/A#4's geometric midpoint (452.89 Hz), below the arithmetic one (453.08 Hz).
        let freq = 453.0;
        assert_eq!(NoteMapper::default().nearest_note(freq).unwrap().name, "A#4");
        assert_eq!(nearest_reference_note(freq).unwrap().name, "A4");
    }

    #[test]
    fn enharmonic_display() {
        let mapper = NoteMapper::default();
        assert_eq!(mapper.nearest_note(92.5).unwrap().display_name(), "F#2/Gb2");
        assert_eq!(mapper.nearest_note(110.0).unwrap().display_name(), "A2");
        assert!(mapper.nearest_note(110.5).unwrap().is_in_tune(10.0));
    }
}
