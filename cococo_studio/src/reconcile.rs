// Reconciling model output with the score it was generated against.
//
// The model returns a full score of one-step notes. Only part of it is new:
// the cells that were masked for generation. Reconciliation keeps that part,
// protects the user's own notes, and joins the one-step fragments back into
// held notes:
//
//   1. keep notes whose step is in its voice's generation mask
//   2. drop notes that would land on a user note's (pitch, position) key in
//      any voice, or on any step a same-voice user note covers
//   3. merge touching same-pitch notes in a voice into held notes
//
// Everything that comes out is agent-authored. Two generated voices may
// still share a key; committing resolves that like any other insert.

use cococo_score::{Note, NoteSequence, Source, VoiceMasks};

pub fn reconcile(generated: Vec<Note>, masks: &VoiceMasks, user_notes: &[Note]) -> NoteSequence {
    let mut kept: NoteSequence = generated
        .into_iter()
        .filter(|n| masks[n.voice.index()].contains(&n.position))
        .filter(|n| {
            !user_notes.iter().any(|u| {
                u.key() == n.key() || (u.voice == n.voice && u.overlaps(n.position, n.end()))
            })
        })
        .map(|mut n| {
            n.source = Source::Agent;
            n
        })
        .collect();
    kept.merge_held_notes();
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use cococo_score::Voice;
    use std::collections::BTreeSet;

    fn soprano_mask(steps: impl IntoIterator<Item = usize>) -> VoiceMasks {
        [
            steps.into_iter().collect(),
            BTreeSet::new(),
            BTreeSet::new(),
            BTreeSet::new(),
        ]
    }

    fn one_step(pitch: u8, steps: std::ops::Range<usize>, voice: Voice) -> Vec<Note> {
        steps.map(|t| Note::agent(pitch, t, 1, voice)).collect()
    }

    fn shape(seq: &NoteSequence) -> Vec<(u8, usize, usize, Voice)> {
        seq.iter()
            .map(|n| (n.pitch, n.position, n.duration, n.voice))
            .collect()
    }

    #[test]
    fn test_only_masked_cells_are_kept() {
        let mut generated = one_step(60, 0..8, Voice::Soprano);
        generated.extend(one_step(48, 0..8, Voice::Bass));
        let out = reconcile(generated, &soprano_mask(2..5), &[]);
        assert_eq!(shape(&out), vec![(60, 2, 3, Voice::Soprano)]);
    }

    #[test]
    fn test_user_note_takes_precedence() {
        let user = vec![Note::user(60, 4, 2, Voice::Soprano)];
        let mut generated = one_step(60, 0..4, Voice::Soprano);
        generated.push(Note::agent(60, 4, 1, Voice::Soprano));
        generated.push(Note::agent(64, 5, 1, Voice::Soprano));
        generated.extend(one_step(62, 6..8, Voice::Soprano));
        let out = reconcile(generated, &soprano_mask(0..8), &user);

        assert_eq!(
            shape(&out),
            vec![(60, 0, 4, Voice::Soprano), (62, 6, 2, Voice::Soprano)]
        );
        assert!(out.iter().all(|n| n.source == Source::Agent));
        assert!(!out.iter().any(|n| n.overlaps(4, 6)));
    }

    #[test]
    fn test_user_notes_in_other_voices_block_only_their_key() {
        let user = vec![Note::user(72, 2, 6, Voice::Bass)];
        let mut generated = one_step(72, 0..2, Voice::Soprano);
        generated.push(Note::agent(72, 2, 1, Voice::Soprano));
        generated.push(Note::agent(72, 3, 1, Voice::Soprano));
        let out = reconcile(generated, &soprano_mask(0..8), &user);
        assert_eq!(
            shape(&out),
            vec![(72, 0, 2, Voice::Soprano), (72, 3, 1, Voice::Soprano)]
        );
    }

    #[test]
    fn test_repeated_pitch_split_by_gap_stays_split() {
        let generated = vec![
            Note::agent(65, 0, 1, Voice::Soprano),
            Note::agent(65, 2, 1, Voice::Soprano),
        ];
        let out = reconcile(generated, &soprano_mask(0..4), &[]);
        assert_eq!(out.len(), 2);
    }
}
