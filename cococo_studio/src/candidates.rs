// Generation candidates awaiting a decision.
//
// Index 0 is always the original: the notes that were masked when
// generation began, so the user can compare against and fall back to what
// was there. Indices 1.. are the reconciled outputs in the order they were
// generated. A fresh set selects the first output when there is one.
//
// The set also carries the masks it was generated against, so a commit
// replaces exactly the notes the outputs were meant to replace even if the
// masks were edited in the meantime.

use crate::error::{Result, StudioError};
use cococo_score::{NoteSequence, VoiceMasks};

#[derive(Debug, Clone, PartialEq)]
pub struct Candidates {
    sequences: Vec<NoteSequence>,
    masks: VoiceMasks,
    selected: usize,
}

impl Candidates {
    pub fn new(masks: VoiceMasks, original: NoteSequence, outputs: Vec<NoteSequence>) -> Self {
        let selected = usize::from(!outputs.is_empty());
        let mut sequences = Vec::with_capacity(outputs.len() + 1);
        sequences.push(original);
        sequences.extend(outputs);
        Candidates {
            sequences,
            masks,
            selected,
        }
    }

    /// The per-voice steps that were regenerated.
    pub fn masks(&self) -> &VoiceMasks {
        &self.masks
    }

    /// Number of candidates, the original included.
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Always false: the original is always present.
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&NoteSequence> {
        self.sequences.get(index)
    }

    pub fn original(&self) -> &NoteSequence {
        &self.sequences[0]
    }

    pub fn outputs(&self) -> &[NoteSequence] {
        &self.sequences[1..]
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn selected(&self) -> &NoteSequence {
        &self.sequences[self.selected]
    }

    pub fn is_original_selected(&self) -> bool {
        self.selected == 0
    }

    pub fn select(&mut self, index: usize) -> Result<()> {
        if index >= self.sequences.len() {
            return Err(StudioError::InvalidCandidate {
                index,
                count: self.sequences.len(),
            });
        }
        self.selected = index;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cococo_score::{Note, Voice};

    fn candidates(original: NoteSequence, outputs: Vec<NoteSequence>) -> Candidates {
        Candidates::new(VoiceMasks::default(), original, outputs)
    }

    fn seq(pitch: u8) -> NoteSequence {
        NoteSequence::from_notes(vec![Note::agent(pitch, 0, 1, Voice::Alto)])
    }

    #[test]
    fn test_first_output_selected_by_default() {
        let c = candidates(seq(60), vec![seq(62), seq(64)]);
        assert_eq!(c.len(), 3);
        assert_eq!(c.selected_index(), 1);
        assert_eq!(c.selected().notes()[0].pitch, 62);
        assert_eq!(c.outputs().len(), 2);
    }

    #[test]
    fn test_no_outputs_selects_original() {
        let c = candidates(seq(60), Vec::new());
        assert!(c.is_original_selected());
        assert!(!c.is_empty());
    }

    #[test]
    fn test_select_out_of_range() {
        let mut c = candidates(seq(60), vec![seq(62)]);
        c.select(0).unwrap();
        assert!(c.is_original_selected());
        assert!(matches!(
            c.select(2),
            Err(StudioError::InvalidCandidate { index: 2, count: 2 })
        ));
        assert_eq!(c.selected_index(), 0);
    }
}
