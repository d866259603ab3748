//! # Cents and Equal-Temperament Reference
//!
//! Logarithmic pitch helpers shared by the estimators and the resolver, plus
//! a 12-TET readout (nearest MIDI note and its deviation) so a display can
//! show the familiar note name next to the just-intonation ratio.

use once_cell::sync::Lazy;

/// Standard concert pitch for A4.
pub const DEFAULT_A4_HZ: f64 = 440.0;

/// MIDI note number of A4.
const A4_MIDI: i32 = 69;

/// Note names for MIDI notes 0..=127 (`C-1` to `G9`), computed once.
static NOTE_NAMES: Lazy<Vec<String>> = Lazy::new(|| {
    const PITCH_CLASSES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    (0..128)
        .map(|midi: i32| {
            let octave = midi / 12 - 1;
            format!("{}{}", PITCH_CLASSES[(midi % 12) as usize], octave)
        })
        .collect()
});

/// Calculates the deviation of `freq` from `reference` in cents.
///
/// Positive values mean `freq` is sharp of `reference`.
pub fn cents_between(freq: f64, reference: f64) -> f64 {
    1200.0 * (freq / reference).log2()
}

/// True for a finite, strictly positive frequency.
pub fn is_valid_frequency(hz: f64) -> bool {
    hz.is_finite() && hz > 0.0
}

/// The nearest equal-tempered note to a frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteReading {
    /// Note name such as `"A4"` or `"C#3"`.
    pub name: &'static str,
    /// MIDI note number.
    pub midi: u8,
    /// Frequency of the tempered note in Hz.
    pub frequency: f64,
    /// Deviation of the measured frequency from the note, in cents.
    pub cents: f64,
}

/// Finds the closest 12-TET note to `freq` given the A4 reference.
///
/// Returns `None` for invalid frequencies and for pitches outside the MIDI
/// range.
pub fn find_nearest_note(freq: f64, a4_hz: f64) -> Option<NoteReading> {
    if !is_valid_frequency(freq) || !is_valid_frequency(a4_hz) {
        return None;
    }
    let semitones = 12.0 * (freq / a4_hz).log2();
    let midi = A4_MIDI as f64 + semitones.round();
    if !(0.0..=127.0).contains(&midi) {
        return None;
    }
    let midi = midi as u8;
    let frequency = note_frequency(midi, a4_hz);
    Some(NoteReading {
        name: NOTE_NAMES[midi as usize].as_str(),
        midi,
        frequency,
        cents: cents_between(freq, frequency),
    })
}

/// Equal-tempered frequency of a MIDI note.
pub fn note_frequency(midi: u8, a4_hz: f64) -> f64 {
    a4_hz * 2f64.powf((midi as i32 - A4_MIDI) as f64 / 12.0)
}
