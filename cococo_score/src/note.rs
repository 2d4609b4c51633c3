// Notes: the atomic events of the score.
//
// A note is a pitch held by one voice for a whole number of sixteenth-note
// steps, starting at `position`. Its end is exclusive (`position + duration`)
// and its duration is never zero. Every note also remembers who wrote it
// (`Source::User` or `Source::Agent`); the studio uses this to make sure
// generated material never overrides what the user authored.
//
// Identity: each note gets a fresh `NoteId` at construction from a
// process-wide counter. Ids are never reused, so two notes created from the
// same record are distinct notes. Within the editor a note is addressed by its
// `NoteKey` (position, pitch), which is unique across the score.
//
// `NoteRecord` is the persisted shape `{pitch, position, duration, voice,
// source}` exchanged with undo snapshots and save files.

use crate::error::ScoreError;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_NOTE_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonically increasing note identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteId(pub u64);

impl NoteId {
    fn fresh() -> Self {
        NoteId(NEXT_NOTE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Voice index in SATB order. Serialized as its index (0-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Voice {
    Soprano = 0,
    Alto = 1,
    Tenor = 2,
    Bass = 3,
}

impl Voice {
    pub const ALL: [Voice; 4] = [Voice::Soprano, Voice::Alto, Voice::Tenor, Voice::Bass];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Voice> {
        Voice::ALL.get(index).copied()
    }
}

impl TryFrom<u8> for Voice {
    type Error = ScoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Voice::from_index(value as usize).ok_or(ScoreError::InvalidVoice(value))
    }
}

impl From<Voice> for u8 {
    fn from(voice: Voice) -> u8 {
        voice as u8
    }
}

/// Who wrote a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    User,
    Agent,
}

/// Unique address of a note in the editor. Ordered by position first so
/// iterating a keyed map walks the score left to right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NoteKey {
    pub position: usize,
    pub pitch: u8,
}

impl NoteKey {
    pub fn new(pitch: u8, position: usize) -> Self {
        NoteKey { position, pitch }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub id: NoteId,
    /// MIDI pitch number.
    pub pitch: u8,
    /// Start step (sixteenth notes from the beginning of the score).
    pub position: usize,
    /// Length in steps, always >= 1.
    pub duration: usize,
    pub voice: Voice,
    pub source: Source,
    pub is_masked: bool,
    pub is_selected: bool,
    pub is_playing: bool,
}

impl Note {
    /// Create a note with a fresh id. A zero duration is raised to one step.
    pub fn new(pitch: u8, position: usize, duration: usize, voice: Voice, source: Source) -> Self {
        Note {
            id: NoteId::fresh(),
            pitch,
            position,
            duration: duration.max(1),
            voice,
            source,
            is_masked: false,
            is_selected: false,
            is_playing: false,
        }
    }

    pub fn user(pitch: u8, position: usize, duration: usize, voice: Voice) -> Self {
        Note::new(pitch, position, duration, voice, Source::User)
    }

    pub fn agent(pitch: u8, position: usize, duration: usize, voice: Voice) -> Self {
        Note::new(pitch, position, duration, voice, Source::Agent)
    }

    /// Exclusive end step.
    pub fn end(&self) -> usize {
        self.position + self.duration
    }

    pub fn key(&self) -> NoteKey {
        NoteKey::new(self.pitch, self.position)
    }

    /// The steps this note covers.
    pub fn steps(&self) -> Range<usize> {
        self.position..self.end()
    }

    pub fn spans(&self, step: usize) -> bool {
        self.steps().contains(&step)
    }

    /// True if this note shares at least one step with `[start, end)`.
    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.position < end && start < self.end()
    }

    pub fn is_user(&self) -> bool {
        self.source == Source::User
    }

    pub fn to_record(&self) -> NoteRecord {
        NoteRecord {
            pitch: self.pitch,
            position: self.position,
            duration: self.duration,
            voice: self.voice,
            source: self.source,
        }
    }

    pub fn from_record(record: &NoteRecord) -> Self {
        Note::new(
            record.pitch,
            record.position,
            record.duration,
            record.voice,
            record.source,
        )
    }
}

/// Persisted note shape used by undo snapshots and save files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteRecord {
    pub pitch: u8,
    pub position: usize,
    pub duration: usize,
    pub voice: Voice,
    pub source: Source,
}
