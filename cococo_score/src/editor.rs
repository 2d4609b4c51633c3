// The score: every note the user or the model has placed.
//
// Notes are stored in a map keyed by `(position, pitch)`, so there is at most
// one note per key across all four voices; inserting onto an occupied key
// replaces what was there. Adding a note also trims any note of the same
// voice that it overlaps (see `sequence::trim_against`), which keeps every
// voice monophonic.
//
// Besides storage, the editor owns the view-facing state that is not tied to
// masks: selection, playback flags, the key used for the scale view, and the
// quantization step for drawing. Mask state lives in masks.rs and reads the
// editor; the only way back is `mark_masked`, which copies the effective
// mask onto each note's `is_masked` flag.
//
// Grid geometry is fixed at construction by `EditorLayout`: total steps is
// `total_bars * quarters_per_bar * steps_per_quarter`, pitches span
// `min_pitch..=max_pitch`.

use crate::error::{Result, ScoreError};
use crate::masks::{Masks, is_note_masked};
use crate::note::{Note, NoteKey, NoteRecord, Source, Voice};
use crate::scale::{Key, pitch_name};
use crate::sequence::{NoteSequence, Trim, trim_against};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Grid geometry of the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorLayout {
    pub total_bars: usize,
    pub quarters_per_bar: usize,
    pub steps_per_quarter: usize,
    pub min_pitch: u8,
    pub max_pitch: u8,
}

impl Default for EditorLayout {
    fn default() -> Self {
        EditorLayout {
            total_bars: 2,
            quarters_per_bar: 4,
            steps_per_quarter: 4,
            min_pitch: 36,
            max_pitch: 81,
        }
    }
}

impl EditorLayout {
    pub fn steps_per_bar(&self) -> usize {
        self.quarters_per_bar * self.steps_per_quarter
    }

    pub fn total_steps(&self) -> usize {
        self.total_bars * self.steps_per_bar()
    }

    pub fn num_pitches(&self) -> usize {
        (self.max_pitch - self.min_pitch) as usize + 1
    }
}

/// One row of the piano-roll scale view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleRow {
    pub pitch: u8,
    pub name: String,
    pub in_key: bool,
}

#[derive(Debug, Clone)]
pub struct Editor {
    layout: EditorLayout,
    notes: BTreeMap<NoteKey, Note>,
    key: Key,
    quantize_step: usize,
}

impl Editor {
    pub fn new(layout: EditorLayout) -> Self {
        Editor {
            layout,
            notes: BTreeMap::new(),
            key: Key::default(),
            quantize_step: 1,
        }
    }

    pub fn layout(&self) -> &EditorLayout {
        &self.layout
    }

    pub fn total_steps(&self) -> usize {
        self.layout.total_steps()
    }

    // --- Storage ---------------------------------------------------------

    /// Insert a note, replacing any note at the same key and trimming
    /// same-voice notes it overlaps. Returns the key it was stored under.
    pub fn add_note(&mut self, note: Note) -> Result<NoteKey> {
        self.check_bounds(&note)?;
        let key = note.key();
        self.notes.remove(&key);

        let trims: Vec<(NoteKey, Trim)> = self
            .notes
            .iter()
            .map(|(k, existing)| (*k, trim_against(existing, &note)))
            .filter(|(_, t)| *t != Trim::Keep)
            .collect();

        for (existing_key, trim) in trims {
            let Some(mut existing) = self.notes.remove(&existing_key) else {
                continue;
            };
            match trim {
                Trim::Keep => {
                    self.notes.insert(existing_key, existing);
                }
                Trim::Truncate { duration } => {
                    existing.duration = duration;
                    self.notes.insert(existing_key, existing);
                }
                Trim::Shift { position, duration } => {
                    existing.position = position;
                    existing.duration = duration;
                    let shifted = existing.key();
                    if shifted != key {
                        self.notes.insert(shifted, existing);
                    }
                }
                Trim::Remove => {
                    tracing::trace!(pitch = existing.pitch, position = existing.position, "note removed by overlap");
                }
            }
        }

        self.notes.insert(key, note);
        Ok(key)
    }

    pub fn remove_note(&mut self, key: NoteKey) -> Option<Note> {
        self.notes.remove(&key)
    }

    pub fn remove_notes(&mut self, keys: impl IntoIterator<Item = NoteKey>) -> Vec<Note> {
        keys.into_iter().filter_map(|k| self.notes.remove(&k)).collect()
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }

    pub fn get(&self, key: NoteKey) -> Option<&Note> {
        self.notes.get(&key)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// All notes, left to right.
    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.notes.values()
    }

    pub fn user_notes(&self) -> Vec<&Note> {
        self.notes().filter(|n| n.source == Source::User).collect()
    }

    pub fn agent_notes(&self) -> Vec<&Note> {
        self.notes().filter(|n| n.source == Source::Agent).collect()
    }

    pub fn notes_in_voice(&self, voice: Voice) -> Vec<&Note> {
        self.notes().filter(|n| n.voice == voice).collect()
    }

    /// The note sounding in `voice` at `step`, if any.
    pub fn note_at(&self, voice: Voice, step: usize) -> Option<&Note> {
        self.notes().find(|n| n.voice == voice && n.spans(step))
    }

    /// Steps covered by any note of `voice`.
    pub fn occupied_steps(&self, voice: Voice) -> BTreeSet<usize> {
        self.notes()
            .filter(|n| n.voice == voice)
            .flat_map(|n| n.steps())
            .collect()
    }

    pub fn to_sequence(&self) -> NoteSequence {
        self.notes().cloned().collect()
    }

    fn check_bounds(&self, note: &Note) -> Result<()> {
        let (min, max) = (self.layout.min_pitch, self.layout.max_pitch);
        if note.pitch < min || note.pitch > max {
            return Err(ScoreError::PitchOutOfRange {
                pitch: note.pitch,
                min,
                max,
            });
        }
        if note.end() > self.total_steps() {
            return Err(ScoreError::PositionOutOfRange {
                position: note.position,
                end: note.end(),
                total_steps: self.total_steps(),
            });
        }
        Ok(())
    }

    // --- Drag edits ------------------------------------------------------

    /// Move a note to a new pitch/position. The note keeps its id, source
    /// and flags; overlaps at the destination are trimmed. On error the note
    /// stays where it was.
    pub fn move_note(&mut self, key: NoteKey, pitch: u8, position: usize) -> Result<NoteKey> {
        let mut note = self.take_note(key)?;
        let original = note.clone();
        note.pitch = pitch;
        note.position = position;
        match self.add_note(note) {
            Ok(k) => Ok(k),
            Err(e) => {
                self.notes.insert(key, original);
                Err(e)
            }
        }
    }

    /// Change a note's duration (raised to at least one step).
    pub fn resize_note(&mut self, key: NoteKey, duration: usize) -> Result<NoteKey> {
        let mut note = self.take_note(key)?;
        let original = note.clone();
        note.duration = duration.max(1);
        match self.add_note(note) {
            Ok(k) => Ok(k),
            Err(e) => {
                self.notes.insert(key, original);
                Err(e)
            }
        }
    }

    fn take_note(&mut self, key: NoteKey) -> Result<Note> {
        self.notes.remove(&key).ok_or(ScoreError::NoteNotFound {
            pitch: key.pitch,
            position: key.position,
        })
    }

    // --- Selection & playback --------------------------------------------

    pub fn select(&mut self, key: NoteKey) -> bool {
        self.set_selected(key, true)
    }

    pub fn deselect(&mut self, key: NoteKey) -> bool {
        self.set_selected(key, false)
    }

    fn set_selected(&mut self, key: NoteKey, selected: bool) -> bool {
        match self.notes.get_mut(&key) {
            Some(n) => {
                n.is_selected = selected;
                true
            }
            None => false,
        }
    }

    pub fn clear_selection(&mut self) {
        for n in self.notes.values_mut() {
            n.is_selected = false;
        }
    }

    pub fn selected_notes(&self) -> Vec<&Note> {
        self.notes().filter(|n| n.is_selected).collect()
    }

    pub fn remove_selected(&mut self) -> Vec<Note> {
        let keys: Vec<NoteKey> = self.selected_notes().iter().map(|n| n.key()).collect();
        self.remove_notes(keys)
    }

    /// Flag the notes sounding at `step` as playing; `None` stops playback.
    pub fn set_playhead(&mut self, step: Option<usize>) {
        for n in self.notes.values_mut() {
            n.is_playing = step.is_some_and(|s| n.spans(s));
        }
    }

    pub fn playing_notes(&self) -> Vec<&Note> {
        self.notes().filter(|n| n.is_playing).collect()
    }

    /// Refresh every note's `is_masked` flag from the effective masks.
    pub fn mark_masked(&mut self, masks: &Masks) {
        let effective = masks.generation_masks(self);
        for n in self.notes.values_mut() {
            n.is_masked = is_note_masked(n, &effective);
        }
    }

    // --- Key, scale view, quantization -----------------------------------

    pub fn key(&self) -> Key {
        self.key
    }

    pub fn set_key(&mut self, key: Key) {
        self.key = key;
    }

    /// Piano-roll rows from the highest pitch down.
    pub fn scale(&self) -> Vec<ScaleRow> {
        (self.layout.min_pitch..=self.layout.max_pitch)
            .rev()
            .map(|pitch| ScaleRow {
                pitch,
                name: pitch_name(pitch),
                in_key: self.key.is_in_key(pitch),
            })
            .collect()
    }

    pub fn quantize_step(&self) -> usize {
        self.quantize_step
    }

    pub fn set_quantize_step(&mut self, step: usize) -> Result<()> {
        if !matches!(step, 1 | 2 | 4) {
            return Err(ScoreError::InvalidQuantizeStep(step));
        }
        self.quantize_step = step;
        Ok(())
    }

    /// Snap a step down to the quantization grid.
    pub fn quantize(&self, step: usize) -> usize {
        step - step % self.quantize_step
    }

    // --- Persistence shape -----------------------------------------------

    pub fn to_records(&self) -> Vec<NoteRecord> {
        self.notes().map(Note::to_record).collect()
    }

    /// Replace the whole score with the given records. Records are applied
    /// in order with the usual overlap trimming. Invalid records are skipped;
    /// their errors are returned in record order.
    pub fn load_records(&mut self, records: &[NoteRecord]) -> Vec<ScoreError> {
        self.notes.clear();
        let mut skipped = Vec::new();
        for record in records {
            if let Err(e) = self.add_note(Note::from_record(record)) {
                tracing::warn!(error = %e, "skipping invalid note record");
                skipped.push(e);
            }
        }
        skipped
    }
}

impl Default for Editor {
    fn default() -> Self {
        Editor::new(EditorLayout::default())
    }
}
