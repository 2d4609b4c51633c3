// Error types for score editing.
//
// Editing operations reject notes that fall outside the editor's grid (pitch
// range or step range) and references to notes that no longer exist. Mask
// operations never fail; see masks.rs.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScoreError {
    #[error("invalid voice index: {0} (expected 0..4)")]
    InvalidVoice(u8),
    #[error("pitch {pitch} outside editor range {min}..={max}")]
    PitchOutOfRange { pitch: u8, min: u8, max: u8 },
    #[error("note at step {position} (end {end}) exceeds score length {total_steps}")]
    PositionOutOfRange {
        position: usize,
        end: usize,
        total_steps: usize,
    },
    #[error("no note at pitch {pitch}, position {position}")]
    NoteNotFound { pitch: u8, position: usize },
    #[error("quantization step must be 1, 2 or 4 sixteenths, got {0}")]
    InvalidQuantizeStep(usize),
    #[error("unknown key name: {0:?}")]
    UnknownKey(String),
    #[error("unknown mode name: {0:?}")]
    UnknownMode(String),
}

pub type Result<T> = std::result::Result<T, ScoreError>;
