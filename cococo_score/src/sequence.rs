// Ordered note collections for one four-voice score.
//
// `NoteSequence` is the unkeyed counterpart of the editor: a plain list of
// notes that can be sorted and merged so consecutive identical-pitch steps
// become one held note. The studio uses it to post-process model output,
// which arrives as one note per step and knows nothing about held notes.
//
// The overlap rule (`trim_against`) is applied by the editor whenever a note
// lands on top of another in the same voice:
// - an existing note that starts before the incoming one is cut off at the
//   incoming note's start;
// - otherwise, if it ends after the incoming note it keeps its tail, which
//   now starts where the incoming note ends;
// - otherwise it is swallowed and removed.

use crate::note::{Note, Voice};
use crate::scale::pitch_name;

/// What to do with an existing note that overlaps an incoming one in the
/// same voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trim {
    /// No shared steps.
    Keep,
    /// Shorten to the given duration (start unchanged).
    Truncate { duration: usize },
    /// Move the start to `position`, keeping the original end.
    Shift { position: usize, duration: usize },
    Remove,
}

/// Decide how `existing` must change so it no longer overlaps `incoming`.
/// Notes in different voices never interact.
pub fn trim_against(existing: &Note, incoming: &Note) -> Trim {
    if existing.voice != incoming.voice || !existing.overlaps(incoming.position, incoming.end()) {
        return Trim::Keep;
    }
    if existing.position < incoming.position {
        Trim::Truncate {
            duration: incoming.position - existing.position,
        }
    } else if existing.end() > incoming.end() {
        Trim::Shift {
            position: incoming.end(),
            duration: existing.end() - incoming.end(),
        }
    } else {
        Trim::Remove
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteSequence {
    notes: Vec<Note>,
}

impl NoteSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_notes(notes: Vec<Note>) -> Self {
        let mut seq = NoteSequence { notes };
        seq.sort();
        seq
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn into_notes(self) -> Vec<Note> {
        self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter()
    }

    pub fn push(&mut self, note: Note) {
        self.notes.push(note);
    }

    /// Sort by voice, then position, then pitch.
    pub fn sort(&mut self) {
        self.notes
            .sort_by_key(|n| (n.voice.index(), n.position, n.pitch));
    }

    pub fn voice(&self, voice: Voice) -> impl Iterator<Item = &Note> {
        self.notes.iter().filter(move |n| n.voice == voice)
    }

    /// Exclusive end of the last note, or 0 when empty.
    pub fn end(&self) -> usize {
        self.notes.iter().map(Note::end).max().unwrap_or(0)
    }

    /// Coalesce runs of identical-pitch notes in the same voice that touch
    /// end-to-start into single held notes. Only notes from the same source
    /// are joined, so an agent continuation never extends a user note.
    pub fn merge_held_notes(&mut self) {
        self.sort();
        let mut merged: Vec<Note> = Vec::with_capacity(self.notes.len());
        for note in self.notes.drain(..) {
            if let Some(held) = merged
                .iter_mut()
                .rev()
                .take_while(|m| m.voice == note.voice)
                .find(|m| m.pitch == note.pitch && m.end() == note.position && m.source == note.source)
            {
                held.duration += note.duration;
                continue;
            }
            merged.push(note);
        }
        self.notes = merged;
        self.sort();
    }

    /// Compact text rendering, one row per voice, a bar line every
    /// `steps_per_bar` steps. Held steps are drawn as dashes and rests as
    /// dots; when a voice has several simultaneous notes only the lowest is
    /// shown.
    pub fn summary(&self, total_steps: usize, steps_per_bar: usize) -> String {
        let mut out = String::new();
        for voice in Voice::ALL {
            out.push_str(&format!("{:>8}: ", format!("{voice:?}")));
            let mut row: Vec<Option<&Note>> = vec![None; total_steps];
            for note in self.voice(voice) {
                for step in note.steps().filter(|&s| s < total_steps) {
                    let slot = &mut row[step];
                    if slot.is_none_or(|n| note.pitch < n.pitch) {
                        *slot = Some(note);
                    }
                }
            }
            for (step, cell) in row.iter().enumerate() {
                if step > 0 && steps_per_bar > 0 && step % steps_per_bar == 0 {
                    out.push('|');
                }
                match cell {
                    None => out.push('.'),
                    Some(n) if n.position == step => out.push_str(&pitch_name(n.pitch)),
                    Some(_) => out.push('-'),
                }
            }
            out.push('\n');
        }
        out
    }
}

impl FromIterator<Note> for NoteSequence {
    fn from_iter<I: IntoIterator<Item = Note>>(iter: I) -> Self {
        NoteSequence::from_notes(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_truncates_earlier_note() {
        let existing = Note::user(60, 2, 4, Voice::Soprano);
        let incoming = Note::user(60, 4, 4, Voice::Soprano);
        assert_eq!(trim_against(&existing, &incoming), Trim::Truncate { duration: 2 });
    }

    #[test]
    fn test_trim_shifts_later_note() {
        let existing = Note::user(62, 4, 6, Voice::Alto); // 4..10
        let incoming = Note::user(60, 2, 4, Voice::Alto); // 2..6
        assert_eq!(
            trim_against(&existing, &incoming),
            Trim::Shift {
                position: 6,
                duration: 4
            }
        );
    }

    #[test]
    fn test_trim_removes_swallowed_note() {
        let existing = Note::user(62, 4, 2, Voice::Alto);
        let incoming = Note::user(60, 4, 4, Voice::Alto);
        assert_eq!(trim_against(&existing, &incoming), Trim::Remove);
    }

    #[test]
    fn test_trim_ignores_other_voices() {
        let existing = Note::user(62, 4, 2, Voice::Alto);
        let incoming = Note::user(60, 4, 4, Voice::Tenor);
        assert_eq!(trim_against(&existing, &incoming), Trim::Keep);
    }

    #[test]
    fn test_merge_held_notes() {
        let mut seq: NoteSequence = (0..4)
            .map(|s| Note::agent(60, s, 1, Voice::Soprano))
            .chain([
                Note::agent(62, 4, 1, Voice::Soprano),
                Note::agent(62, 5, 1, Voice::Soprano),
                Note::agent(48, 0, 1, Voice::Bass),
                Note::agent(48, 2, 1, Voice::Bass),
            ])
            .collect();
        seq.merge_held_notes();
        let shape: Vec<(u8, usize, usize, Voice)> = seq
            .iter()
            .map(|n| (n.pitch, n.position, n.duration, n.voice))
            .collect();
        assert_eq!(
            shape,
            vec![
                (60, 0, 4, Voice::Soprano),
                (62, 4, 2, Voice::Soprano),
                (48, 0, 1, Voice::Bass),
                (48, 2, 1, Voice::Bass),
            ]
        );
    }

    #[test]
    fn test_merge_keeps_sources_apart() {
        let mut seq = NoteSequence::from_notes(vec![
            Note::user(60, 0, 2, Voice::Tenor),
            Note::agent(60, 2, 1, Voice::Tenor),
        ]);
        seq.merge_held_notes();
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn test_summary_rows() {
        let seq = NoteSequence::from_notes(vec![
            Note::user(60, 0, 2, Voice::Soprano),
            Note::user(48, 2, 1, Voice::Bass),
        ]);
        let text = seq.summary(4, 2);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], " Soprano: C4-|..");
        assert_eq!(lines[3], "    Bass: ..|C3.");
    }
}
