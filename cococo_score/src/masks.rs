// Per-voice step masks: which parts of the score the model may rewrite.
//
// The user paints masks onto the grid; each of the four voices has its own
// sorted set of masked step indices. Storage is lenient (indices are kept as
// given, even past the end of the score) so a mask survives a later change of
// score length. Everything that feeds generation goes through
// `generation_masks`, which clamps to `[0, total_steps)`.
//
// Two modes decide what "effective mask" means:
//
// - `Standard`: exactly the user masks, intersected with the loop window when
//   one is set. A voice with no user mask is not generated.
// - `Baseline`: the legacy behavior. If any voice has a user mask, the user
//   masks are used as-is; otherwise every voice's silent steps are masked
//   (`implicit_masks`). The loop window is ignored.
//
// The editor is read, never written, except through `Editor::mark_masked`.

use crate::editor::Editor;
use crate::note::{Note, Voice};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One step set per voice, indexed by `Voice::index()`.
pub type VoiceMasks = [BTreeSet<usize>; 4];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskMode {
    #[default]
    Standard,
    Baseline,
}

/// Half-open playback loop `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopWindow {
    pub start: usize,
    pub end: usize,
}

impl LoopWindow {
    pub fn new(start: usize, end: usize) -> Self {
        LoopWindow { start, end }
    }

    pub fn contains(&self, step: usize) -> bool {
        (self.start..self.end).contains(&step)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Masks {
    user: VoiceMasks,
    mode: MaskMode,
    loop_window: Option<LoopWindow>,
}

impl Masks {
    pub fn new(mode: MaskMode) -> Self {
        Masks {
            mode,
            ..Masks::default()
        }
    }

    pub fn mode(&self) -> MaskMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: MaskMode) {
        self.mode = mode;
    }

    pub fn loop_window(&self) -> Option<LoopWindow> {
        self.loop_window
    }

    pub fn set_loop_window(&mut self, window: Option<LoopWindow>) {
        self.loop_window = window;
    }

    // --- User masks ------------------------------------------------------

    /// Replace a voice's mask.
    pub fn set_mask(&mut self, voice: Voice, steps: impl IntoIterator<Item = usize>) {
        self.user[voice.index()] = steps.into_iter().collect();
    }

    pub fn add_mask(&mut self, voice: Voice, steps: impl IntoIterator<Item = usize>) {
        self.user[voice.index()].extend(steps);
    }

    pub fn remove_mask(&mut self, voice: Voice, steps: impl IntoIterator<Item = usize>) {
        let mask = &mut self.user[voice.index()];
        for step in steps {
            mask.remove(&step);
        }
    }

    /// The user mask of one voice, as stored.
    pub fn mask(&self, voice: Voice) -> &BTreeSet<usize> {
        &self.user[voice.index()]
    }

    pub fn user_masks(&self) -> &VoiceMasks {
        &self.user
    }

    /// Mask every step covered by the given notes in their own voices. With
    /// `replace`, voices touched by the notes drop their previous mask first.
    pub fn mask_notes<'a>(&mut self, notes: impl IntoIterator<Item = &'a Note>, replace: bool) {
        let mut touched = VoiceMasks::default();
        for note in notes {
            touched[note.voice.index()].extend(note.steps());
        }
        for (mask, steps) in self.user.iter_mut().zip(touched) {
            if steps.is_empty() {
                continue;
            }
            if replace {
                *mask = steps;
            } else {
                mask.extend(steps);
            }
        }
    }

    pub fn clear(&mut self) {
        self.user = VoiceMasks::default();
    }

    pub fn has_user_masks(&self) -> bool {
        self.user.iter().any(|m| !m.is_empty())
    }

    // --- Effective masks -------------------------------------------------

    /// The per-voice masks generation should fill, per the current mode.
    /// Never yields a step outside `[0, total_steps)`.
    pub fn generation_masks(&self, editor: &Editor) -> VoiceMasks {
        let total_steps = editor.total_steps();
        let base = match self.mode {
            MaskMode::Baseline if !self.has_user_masks() => implicit_masks(editor),
            MaskMode::Baseline => self.user.clone(),
            MaskMode::Standard => match self.loop_window {
                Some(window) => self
                    .user
                    .clone()
                    .map(|m| m.into_iter().filter(|&s| window.contains(s)).collect()),
                None => self.user.clone(),
            },
        };
        base.map(|m| m.into_iter().filter(|&s| s < total_steps).collect())
    }

    pub fn masked_notes<'e>(&self, editor: &'e Editor) -> Vec<&'e Note> {
        let effective = self.generation_masks(editor);
        editor
            .notes()
            .filter(|n| is_note_masked(n, &effective))
            .collect()
    }

    pub fn non_masked_notes<'e>(&self, editor: &'e Editor) -> Vec<&'e Note> {
        let effective = self.generation_masks(editor);
        editor
            .notes()
            .filter(|n| !is_note_masked(n, &effective))
            .collect()
    }

    // --- Undo support ----------------------------------------------------

    pub fn snapshot(&self) -> [Vec<usize>; 4] {
        self.user.clone().map(|m| m.into_iter().collect())
    }

    pub fn restore(&mut self, snapshot: &[Vec<usize>; 4]) {
        for (mask, steps) in self.user.iter_mut().zip(snapshot) {
            *mask = steps.iter().copied().collect();
        }
    }
}

/// Per voice, the steps not covered by any note.
pub fn implicit_masks(editor: &Editor) -> VoiceMasks {
    let total_steps = editor.total_steps();
    Voice::ALL.map(|voice| {
        let occupied = editor.occupied_steps(voice);
        (0..total_steps).filter(|s| !occupied.contains(s)).collect()
    })
}

/// True if any step of the note is masked in its own voice.
pub fn is_note_masked(note: &Note, masks: &VoiceMasks) -> bool {
    let mask = &masks[note.voice.index()];
    mask.range(note.position..note.end()).next().is_some()
}

/// Flatten masks to `(step, voice)` pairs, ordered by voice then step.
pub fn steps_and_voices(masks: &VoiceMasks) -> Vec<(usize, Voice)> {
    Voice::ALL
        .iter()
        .flat_map(|&voice| masks[voice.index()].iter().map(move |&s| (s, voice)))
        .collect()
}
