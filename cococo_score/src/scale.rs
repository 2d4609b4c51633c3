// Keys, scale membership and diatonic triads.
//
// The editor shows the piano-roll rows colored by whether each pitch is in the
// current key, and the mood prior in the model crate biases sampling toward
// "happy" (major-quality) or "sad" (minor-quality) diatonic triads of a key.
// Both read from this module.
//
// A `Key` is a tonic pitch class plus a `Mode` (major or natural minor). Key
// and mode names are parsed from the strings the UI sends ("C", "F#", "Bb",
// "major", "minor").

use crate::error::{Result, ScoreError};
use serde::{Deserialize, Serialize};

const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Ionian: W W H W W W H
    Major,
    /// Aeolian (natural minor): W H W W H W W
    Minor,
}

impl Mode {
    /// Semitone offsets of the seven scale degrees from the tonic.
    pub fn intervals(self) -> [u8; 7] {
        match self {
            Mode::Major => [0, 2, 4, 5, 7, 9, 11],
            Mode::Minor => [0, 2, 3, 5, 7, 8, 10],
        }
    }

    pub fn parse(name: &str) -> Result<Mode> {
        match name.trim().to_lowercase().as_str() {
            "major" | "maj" | "ionian" => Ok(Mode::Major),
            "minor" | "min" | "aeolian" => Ok(Mode::Minor),
            _ => Err(ScoreError::UnknownMode(name.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriadQuality {
    Major,
    Minor,
    Diminished,
}

/// A diatonic triad: root pitch class plus quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Triad {
    pub root_pc: u8,
    pub quality: TriadQuality,
}

impl Triad {
    /// The three pitch classes of the triad.
    pub fn pitch_classes(&self) -> [u8; 3] {
        let third = match self.quality {
            TriadQuality::Major => 4,
            TriadQuality::Minor | TriadQuality::Diminished => 3,
        };
        let fifth = match self.quality {
            TriadQuality::Diminished => 6,
            _ => 7,
        };
        [
            self.root_pc % 12,
            (self.root_pc + third) % 12,
            (self.root_pc + fifth) % 12,
        ]
    }

    pub fn contains_pitch(&self, pitch: u8) -> bool {
        self.pitch_classes().contains(&(pitch % 12))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Pitch class of the tonic (0 = C, 2 = D, ...).
    pub tonic_pc: u8,
    pub mode: Mode,
}

impl Default for Key {
    fn default() -> Self {
        Key::new(0, Mode::Major)
    }
}

impl Key {
    pub fn new(tonic_pc: u8, mode: Mode) -> Self {
        Key {
            tonic_pc: tonic_pc % 12,
            mode,
        }
    }

    /// Parse a key name and a mode name, e.g. `("Bb", "minor")`.
    pub fn parse(key: &str, mode: &str) -> Result<Key> {
        Ok(Key::new(parse_pitch_class(key)?, Mode::parse(mode)?))
    }

    pub fn is_in_key(&self, pitch: u8) -> bool {
        self.scale_degree(pitch).is_some()
    }

    /// Scale degree (0-6) of a pitch, or None if it is chromatic.
    pub fn scale_degree(&self, pitch: u8) -> Option<u8> {
        let pc = (pitch % 12 + 12 - self.tonic_pc) % 12;
        self.mode
            .intervals()
            .iter()
            .position(|&iv| iv == pc)
            .map(|d| d as u8)
    }

    pub fn pitches_in_range(&self, low: u8, high: u8) -> Vec<u8> {
        (low..=high).filter(|&p| self.is_in_key(p)).collect()
    }

    /// Snap a pitch to the nearest in-key pitch, preferring the lower neighbor.
    pub fn snap(&self, pitch: u8) -> u8 {
        if self.is_in_key(pitch) {
            return pitch;
        }
        for offset in 1u8..=6 {
            if pitch >= offset && self.is_in_key(pitch - offset) {
                return pitch - offset;
            }
            if pitch <= 127 - offset && self.is_in_key(pitch + offset) {
                return pitch + offset;
            }
        }
        pitch
    }

    /// The seven diatonic triads, built by stacking scale thirds on each degree.
    pub fn triads(&self) -> Vec<Triad> {
        let iv = self.mode.intervals();
        (0..7)
            .map(|degree| {
                let root = iv[degree];
                let third = (iv[(degree + 2) % 7] + 12 - root) % 12;
                let fifth = (iv[(degree + 4) % 7] + 12 - root) % 12;
                let quality = match (third, fifth) {
                    (4, 7) => TriadQuality::Major,
                    (3, 7) => TriadQuality::Minor,
                    _ => TriadQuality::Diminished,
                };
                Triad {
                    root_pc: (self.tonic_pc + root) % 12,
                    quality,
                }
            })
            .collect()
    }

    /// Major-quality diatonic triads.
    pub fn happy_triads(&self) -> Vec<Triad> {
        self.triads()
            .into_iter()
            .filter(|t| t.quality == TriadQuality::Major)
            .collect()
    }

    /// Minor-quality diatonic triads.
    pub fn sad_triads(&self) -> Vec<Triad> {
        self.triads()
            .into_iter()
            .filter(|t| t.quality == TriadQuality::Minor)
            .collect()
    }

    pub fn name(&self) -> String {
        let mode = match self.mode {
            Mode::Major => "major",
            Mode::Minor => "minor",
        };
        format!("{} {}", PITCH_CLASS_NAMES[self.tonic_pc as usize], mode)
    }
}

/// Parse a note name without octave ("C", "c#", "Bb", "F♯") to a pitch class.
pub fn parse_pitch_class(name: &str) -> Result<u8> {
    let trimmed = name.trim();
    let mut chars = trimmed.chars();
    let base = match chars.next().map(|c| c.to_ascii_uppercase()) {
        Some('C') => 0i8,
        Some('D') => 2,
        Some('E') => 4,
        Some('F') => 5,
        Some('G') => 7,
        Some('A') => 9,
        Some('B') => 11,
        _ => return Err(ScoreError::UnknownKey(name.to_string())),
    };
    let mut pc = base;
    for accidental in chars {
        match accidental {
            '#' | '♯' => pc += 1,
            'b' | '♭' => pc -= 1,
            _ => return Err(ScoreError::UnknownKey(name.to_string())),
        }
    }
    Ok(pc.rem_euclid(12) as u8)
}

/// Name of a MIDI pitch with octave, MIDI 60 = "C4".
pub fn pitch_name(pitch: u8) -> String {
    let octave = pitch as i16 / 12 - 1;
    format!("{}{}", PITCH_CLASS_NAMES[(pitch % 12) as usize], octave)
}
