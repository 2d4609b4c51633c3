// The co-composition session.
//
// `Studio` is the single context object a host drives. It owns the editor,
// the masks, the undo history, the pending candidates and the generator, and
// every operation goes through it:
//
// - Score and mask edits run inside `undoable`, which snapshots notes and
//   masks first, pushes the snapshot only if something changed, and rolls
//   back on error. View state (selection, playhead, key, loop window) is not
//   recorded.
// - Generation snapshots the score at `begin_generation`: the encoded
//   sequence, the effective masks, the user's notes and the notes currently
//   masked (candidate 0). `step_generation` advances it cooperatively;
//   `generate` runs it to the end.
// - `commit_candidate` replaces the masked agent notes with the selected
//   candidate and clears the masks, as one undoable step.
//
// Masked-note flags on the editor are refreshed after every change that can
// move them.

use crate::candidates::Candidates;
use crate::config::StudioConfig;
use crate::convert;
use crate::error::{Result, StudioError};
use crate::generator::{GenerationRequest, GenerationStatus, Generator};
use cococo_model::Coconet;
use cococo_score::masks::is_note_masked;
use cococo_score::{
    Editor, History, Key, LoopWindow, MaskMode, Masks, Note, NoteKey, NoteRecord, NoteSequence,
    ScoreError, Snapshot, Voice,
};
use std::path::Path;

#[derive(Debug)]
pub struct Studio {
    config: StudioConfig,
    editor: Editor,
    masks: Masks,
    history: History,
    candidates: Option<Candidates>,
    generator: Generator,
}

impl Studio {
    pub fn new(config: StudioConfig) -> Self {
        Studio {
            editor: Editor::new(config.layout),
            masks: Masks::new(config.mask_mode()),
            history: History::new(config.history_limit),
            candidates: None,
            generator: Generator::new(config.seed),
            config,
        }
    }

    pub fn config(&self) -> &StudioConfig {
        &self.config
    }

    pub fn editor(&self) -> &Editor {
        &self.editor
    }

    pub fn masks(&self) -> &Masks {
        &self.masks
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn candidates(&self) -> Option<&Candidates> {
        self.candidates.as_ref()
    }

    // --- Model -----------------------------------------------------------

    pub fn set_model(&mut self, model: Coconet) -> Result<()> {
        self.generator.set_model(model)
    }

    pub fn load_model_dir(&mut self, path: &Path) -> Result<()> {
        self.generator.load_model_dir(path)
    }

    /// Load the checkpoint named in the config.
    pub fn load_configured_model(&mut self) -> Result<()> {
        let dir = self
            .config
            .checkpoint_dir
            .clone()
            .ok_or(StudioError::ModelNotLoaded)?;
        self.generator.load_model_dir(&dir)
    }

    pub fn dispose_model(&mut self) -> Result<()> {
        self.generator.dispose_model()
    }

    // --- Undo ------------------------------------------------------------

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            notes: self.editor.to_records(),
            masks: self.masks.snapshot(),
        }
    }

    fn restore(&mut self, snapshot: &Snapshot) {
        for e in self.editor.load_records(&snapshot.notes) {
            tracing::warn!(error = %e, "snapshot held an invalid note");
        }
        self.masks.restore(&snapshot.masks);
        self.refresh_masked();
    }

    fn refresh_masked(&mut self) {
        self.editor.mark_masked(&self.masks);
    }

    /// Run a score or mask mutation as one undo step. On error the session
    /// is rolled back to where it was.
    pub fn undoable<T>(&mut self, f: impl FnOnce(&mut Studio) -> Result<T>) -> Result<T> {
        let before = self.snapshot();
        match f(self) {
            Ok(value) => {
                if self.snapshot() != before {
                    self.history.push(before);
                }
                self.refresh_masked();
                Ok(value)
            }
            Err(e) => {
                self.restore(&before);
                Err(e)
            }
        }
    }

    pub fn undo(&mut self) -> bool {
        let current = self.snapshot();
        match self.history.undo(current) {
            Some(previous) => {
                self.restore(&previous);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self) -> bool {
        let current = self.snapshot();
        match self.history.redo(current) {
            Some(next) => {
                self.restore(&next);
                true
            }
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // --- Score edits -----------------------------------------------------

    pub fn add_note(&mut self, note: Note) -> Result<NoteKey> {
        self.undoable(|s| Ok(s.editor.add_note(note)?))
    }

    pub fn remove_note(&mut self, key: NoteKey) -> Result<Option<Note>> {
        self.undoable(|s| Ok(s.editor.remove_note(key)))
    }

    pub fn move_note(&mut self, key: NoteKey, pitch: u8, position: usize) -> Result<NoteKey> {
        self.undoable(|s| Ok(s.editor.move_note(key, pitch, position)?))
    }

    pub fn resize_note(&mut self, key: NoteKey, duration: usize) -> Result<NoteKey> {
        self.undoable(|s| Ok(s.editor.resize_note(key, duration)?))
    }

    pub fn remove_selected(&mut self) -> Result<Vec<Note>> {
        self.undoable(|s| Ok(s.editor.remove_selected()))
    }

    pub fn clear_notes(&mut self) -> Result<()> {
        self.undoable(|s| {
            s.editor.clear();
            Ok(())
        })
    }

    /// Replace the score with saved records, as one undo step. Invalid
    /// records are skipped and returned; the rest stay loaded.
    pub fn load_records(&mut self, records: &[NoteRecord]) -> Result<Vec<ScoreError>> {
        self.undoable(|s| Ok(s.editor.load_records(records)))
    }

    pub fn to_records(&self) -> Vec<NoteRecord> {
        self.editor.to_records()
    }

    // --- Mask edits ------------------------------------------------------

    pub fn set_mask(&mut self, voice: Voice, steps: impl IntoIterator<Item = usize>) -> Result<()> {
        self.undoable(|s| {
            s.masks.set_mask(voice, steps);
            Ok(())
        })
    }

    pub fn add_mask(&mut self, voice: Voice, steps: impl IntoIterator<Item = usize>) -> Result<()> {
        self.undoable(|s| {
            s.masks.add_mask(voice, steps);
            Ok(())
        })
    }

    pub fn remove_mask(&mut self, voice: Voice, steps: impl IntoIterator<Item = usize>) -> Result<()> {
        self.undoable(|s| {
            s.masks.remove_mask(voice, steps);
            Ok(())
        })
    }

    /// Mask the steps under the selected notes.
    pub fn mask_selected(&mut self, replace: bool) -> Result<()> {
        self.undoable(|s| {
            s.masks.mask_notes(s.editor.selected_notes(), replace);
            Ok(())
        })
    }

    pub fn clear_masks(&mut self) -> Result<()> {
        self.undoable(|s| {
            s.masks.clear();
            Ok(())
        })
    }

    pub fn set_mask_mode(&mut self, mode: MaskMode) {
        self.masks.set_mode(mode);
        self.refresh_masked();
    }

    pub fn set_loop_window(&mut self, window: Option<LoopWindow>) {
        self.masks.set_loop_window(window);
        self.refresh_masked();
    }

    // --- View state ------------------------------------------------------

    pub fn select(&mut self, key: NoteKey) -> bool {
        self.editor.select(key)
    }

    pub fn deselect(&mut self, key: NoteKey) -> bool {
        self.editor.deselect(key)
    }

    pub fn clear_selection(&mut self) {
        self.editor.clear_selection();
    }

    pub fn set_playhead(&mut self, step: Option<usize>) {
        self.editor.set_playhead(step);
    }

    pub fn set_key(&mut self, key: Key) {
        self.editor.set_key(key);
    }

    pub fn set_quantize_step(&mut self, step: usize) -> Result<()> {
        Ok(self.editor.set_quantize_step(step)?)
    }

    /// Text grid of the current score.
    pub fn summary(&self) -> String {
        let layout = self.editor.layout();
        self.editor
            .to_sequence()
            .summary(layout.total_steps(), layout.steps_per_bar())
    }

    // --- Generation ------------------------------------------------------

    /// Capture the score and masks and start generating. Pending candidates
    /// are kept until the new set arrives.
    pub fn begin_generation(&mut self) -> Result<()> {
        let masks = self.masks.generation_masks(&self.editor);
        let cells = convert::infill_cells(&masks);
        if cells.is_empty() {
            return Err(StudioError::NothingMasked);
        }
        let original: NoteSequence = self
            .masks
            .masked_notes(&self.editor)
            .into_iter()
            .cloned()
            .collect();
        let generation = &self.config.generation;
        let request = GenerationRequest {
            sequence: convert::to_quantized(&self.editor),
            user_notes: self.editor.user_notes().into_iter().cloned().collect(),
            original,
            options: generation.infill_options(cells, self.editor.key()),
            num_candidates: generation.num_candidates.max(1),
            masks,
        };
        self.generator.begin(request)
    }

    pub fn step_generation(&mut self) -> Result<GenerationStatus> {
        let status = self.generator.step()?;
        if let GenerationStatus::Finished(candidates) = &status {
            self.candidates = Some(candidates.clone());
        }
        Ok(status)
    }

    pub fn abort_generation(&mut self) -> bool {
        self.generator.abort()
    }

    pub fn is_generating(&self) -> bool {
        self.generator.is_working()
    }

    /// Generate to completion and return the new candidates.
    pub fn generate(&mut self) -> Result<&Candidates> {
        self.begin_generation()?;
        let candidates = self.generator.run()?;
        Ok(self.candidates.insert(candidates))
    }

    // --- Candidates ------------------------------------------------------

    pub fn select_candidate(&mut self, index: usize) -> Result<()> {
        self.candidates
            .as_mut()
            .ok_or(StudioError::NoCandidates)?
            .select(index)
    }

    pub fn clear_candidates(&mut self) {
        self.candidates = None;
    }

    /// Write the selected candidate into the score: the agent notes under
    /// the masks the candidates were generated against are replaced by the
    /// candidate's notes and the masks are cleared. Committing the original
    /// keeps the notes and only clears the masks.
    pub fn commit_candidate(&mut self) -> Result<()> {
        let candidates = self.candidates.take().ok_or(StudioError::NoCandidates)?;
        let result = self.undoable(|s| {
            if !candidates.is_original_selected() {
                let replaced: Vec<NoteKey> = s
                    .editor
                    .notes()
                    .filter(|n| !n.is_user() && is_note_masked(n, candidates.masks()))
                    .map(Note::key)
                    .collect();
                s.editor.remove_notes(replaced);
                for note in candidates.selected().iter() {
                    s.editor.add_note(note.clone())?;
                }
            }
            s.masks.clear();
            Ok(())
        });
        if result.is_err() {
            self.candidates = Some(candidates);
        }
        result
    }
}

impl Default for Studio {
    fn default() -> Self {
        Studio::new(StudioConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cococo_score::Source;

    fn shape(studio: &Studio) -> Vec<(u8, usize, usize, Voice, Source)> {
        studio
            .editor()
            .notes()
            .map(|n| (n.pitch, n.position, n.duration, n.voice, n.source))
            .collect()
    }

    #[test]
    fn test_undo_redo_notes_and_masks() {
        let mut studio = Studio::default();
        studio.add_note(Note::user(60, 0, 4, Voice::Soprano)).unwrap();
        studio.add_mask(Voice::Alto, 0..4).unwrap();
        assert_eq!(studio.masks().mask(Voice::Alto).len(), 4);

        assert!(studio.undo());
        assert!(studio.masks().mask(Voice::Alto).is_empty());
        assert_eq!(studio.editor().len(), 1);
        assert!(studio.undo());
        assert!(studio.editor().is_empty());
        assert!(!studio.undo());

        assert!(studio.redo());
        assert!(studio.redo());
        assert_eq!(studio.masks().mask(Voice::Alto).len(), 4);
        assert!(!studio.can_redo());
    }

    #[test]
    fn test_failed_edit_rolls_back_without_history() {
        let mut studio = Studio::default();
        studio.add_note(Note::user(60, 0, 4, Voice::Soprano)).unwrap();
        let err = studio.add_note(Note::user(20, 0, 1, Voice::Bass)).unwrap_err();
        assert!(matches!(err, StudioError::Score(_)));
        assert_eq!(studio.editor().len(), 1);
        assert!(studio.undo());
        assert!(!studio.can_undo());
    }

    #[test]
    fn test_partial_load_keeps_valid_records() {
        let mut studio = Studio::default();
        studio.add_note(Note::user(40, 0, 4, Voice::Bass)).unwrap();
        let records = vec![
            Note::user(72, 0, 4, Voice::Soprano).to_record(),
            Note::user(20, 4, 4, Voice::Alto).to_record(),
            Note::agent(55, 4, 4, Voice::Tenor).to_record(),
        ];
        let skipped = studio.load_records(&records).unwrap();
        assert_eq!(skipped.len(), 1);
        assert!(matches!(skipped[0], ScoreError::PitchOutOfRange { pitch: 20, .. }));
        assert_eq!(
            shape(&studio),
            vec![
                (72, 0, 4, Voice::Soprano, Source::User),
                (55, 4, 4, Voice::Tenor, Source::Agent),
            ]
        );

        assert!(studio.undo());
        assert_eq!(shape(&studio), vec![(40, 0, 4, Voice::Bass, Source::User)]);
    }

    #[test]
    fn test_view_state_is_not_recorded() {
        let mut studio = Studio::default();
        let key = studio.add_note(Note::user(60, 0, 4, Voice::Soprano)).unwrap();
        assert!(studio.select(key));
        studio.set_playhead(Some(2));
        assert!(studio.undo());
        assert!(!studio.can_undo());
    }

    #[test]
    fn test_masked_flags_follow_mask_edits() {
        let mut studio = Studio::default();
        let key = studio.add_note(Note::user(60, 4, 4, Voice::Soprano)).unwrap();
        studio.add_mask(Voice::Soprano, [6]).unwrap();
        assert!(studio.editor().get(key).unwrap().is_masked);
        studio.set_loop_window(Some(LoopWindow::new(0, 4)));
        assert!(!studio.editor().get(key).unwrap().is_masked);
    }

    #[test]
    fn test_generation_without_model_or_masks() {
        let mut studio = Studio::default();
        assert!(matches!(
            studio.begin_generation(),
            Err(StudioError::NothingMasked)
        ));
        studio.add_mask(Voice::Alto, 0..4).unwrap();
        assert!(matches!(
            studio.begin_generation(),
            Err(StudioError::ModelNotLoaded)
        ));
        assert!(!studio.is_generating());
    }

    #[test]
    fn test_commit_replaces_masked_agent_notes() {
        let mut studio = Studio::default();
        studio.add_note(Note::user(72, 0, 8, Voice::Soprano)).unwrap();
        studio.add_note(Note::agent(60, 0, 4, Voice::Alto)).unwrap();
        studio.add_note(Note::agent(62, 4, 4, Voice::Alto)).unwrap();
        studio.add_mask(Voice::Alto, 4..8).unwrap();

        let original: NoteSequence = studio
            .masks()
            .masked_notes(studio.editor())
            .into_iter()
            .cloned()
            .collect();
        let masks = studio.masks().generation_masks(studio.editor());
        let output = NoteSequence::from_notes(vec![Note::agent(64, 4, 4, Voice::Alto)]);
        studio.candidates = Some(Candidates::new(masks, original, vec![output]));
        studio.commit_candidate().unwrap();

        assert_eq!(
            shape(&studio),
            vec![
                (60, 0, 4, Voice::Alto, Source::Agent),
                (72, 0, 8, Voice::Soprano, Source::User),
                (64, 4, 4, Voice::Alto, Source::Agent),
            ]
        );
        assert!(!studio.masks().has_user_masks());
        assert!(studio.candidates().is_none());

        assert!(studio.undo());
        assert!(shape(&studio).contains(&(62, 4, 4, Voice::Alto, Source::Agent)));
        assert_eq!(studio.masks().mask(Voice::Alto).len(), 4);
    }

    #[test]
    fn test_commit_original_only_clears_masks() {
        let mut studio = Studio::default();
        studio.add_note(Note::agent(62, 4, 4, Voice::Alto)).unwrap();
        studio.add_mask(Voice::Alto, 4..8).unwrap();
        let before = shape(&studio);
        let output = NoteSequence::from_notes(vec![Note::agent(64, 4, 4, Voice::Alto)]);
        let masks = studio.masks().generation_masks(studio.editor());
        studio.candidates = Some(Candidates::new(masks, NoteSequence::new(), vec![output]));
        studio.select_candidate(0).unwrap();
        studio.commit_candidate().unwrap();
        assert_eq!(shape(&studio), before);
        assert!(!studio.masks().has_user_masks());
        assert!(matches!(studio.commit_candidate(), Err(StudioError::NoCandidates)));
    }

    #[test]
    fn test_commit_uses_generation_masks() {
        let mut studio = Studio::default();
        studio.add_note(Note::agent(60, 0, 4, Voice::Alto)).unwrap();
        studio.add_note(Note::agent(62, 4, 4, Voice::Alto)).unwrap();
        studio.add_mask(Voice::Alto, 4..8).unwrap();
        let masks = studio.masks().generation_masks(studio.editor());
        let output = NoteSequence::from_notes(vec![Note::agent(65, 4, 4, Voice::Alto)]);
        studio.candidates = Some(Candidates::new(masks, NoteSequence::new(), vec![output]));

        // moving the mask after generation must not change what is replaced
        studio.set_mask(Voice::Alto, 0..4).unwrap();
        studio.commit_candidate().unwrap();

        assert_eq!(
            shape(&studio),
            vec![
                (60, 0, 4, Voice::Alto, Source::Agent),
                (65, 4, 4, Voice::Alto, Source::Agent),
            ]
        );
        assert!(!studio.masks().has_user_masks());
    }
}
