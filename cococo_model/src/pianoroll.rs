// The encoding boundary between note sequences and tensors.
//
// `QuantizedSequence` is the model's input and output: notes with integer
// start/end steps and an instrument (voice) index. The pianoroll is a binary
// `[1, steps, pitches, voices]` tensor with a 1 wherever a voice sounds a
// pitch. Decoding is the reverse but loses note boundaries: every occupied
// cell becomes its own one-step note, and callers merge runs back into held
// notes afterwards.
//
// The completion mask (same shape, 1 = "generate here") comes either from an
// explicit list of `(step, voice)` cells, which covers every pitch of those
// cells, or, when no list is given, from every `(step, voice)` whose pitch
// column is empty.

use crate::error::{CoconetError, Result};
use crate::spec::ModelSpec;
use ndarray::{Array4, Axis, s};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuantizedNote {
    pub pitch: u8,
    pub quantized_start_step: usize,
    /// Exclusive.
    pub quantized_end_step: usize,
    pub instrument: usize,
}

impl QuantizedNote {
    pub fn new(pitch: u8, start: usize, end: usize, instrument: usize) -> Self {
        QuantizedNote {
            pitch,
            quantized_start_step: start,
            quantized_end_step: end,
            instrument,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quantization {
    pub steps_per_quarter: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QuantizedSequence {
    pub notes: Vec<QuantizedNote>,
    pub quantization: Option<Quantization>,
    pub total_quantized_steps: Option<usize>,
}

impl QuantizedSequence {
    /// Sequence length in steps: the declared total, or the last note's end.
    pub fn num_steps(&self) -> usize {
        self.total_quantized_steps.unwrap_or_else(|| {
            self.notes
                .iter()
                .map(|n| n.quantized_end_step)
                .max()
                .unwrap_or(0)
        })
    }

    /// Check the sequence against a model's pitch range and voice count.
    /// A sequence needs quantization and at least one note. Returns the
    /// sequence length.
    pub fn validate(&self, spec: &ModelSpec) -> Result<usize> {
        if self.quantization.is_none() {
            return Err(CoconetError::InvalidSequence(
                "sequence is not quantized".to_string(),
            ));
        }
        if self.notes.is_empty() {
            return Err(CoconetError::InvalidSequence(
                "sequence has no notes".to_string(),
            ));
        }
        let num_steps = self.num_steps();
        if num_steps == 0 {
            return Err(CoconetError::InvalidSequence(
                "sequence has no steps".to_string(),
            ));
        }
        for note in &self.notes {
            if note.pitch < spec.min_pitch || note.pitch > spec.max_pitch {
                return Err(CoconetError::PitchOutOfRange {
                    pitch: note.pitch,
                    min: spec.min_pitch,
                    max: spec.max_pitch,
                });
            }
            if note.instrument >= spec.num_instruments {
                return Err(CoconetError::InvalidInstrument(note.instrument));
            }
            if note.quantized_end_step > num_steps {
                return Err(CoconetError::StepOutOfRange {
                    end: note.quantized_end_step,
                    num_steps,
                });
            }
        }
        Ok(num_steps)
    }
}

/// One cell of the score grid: a step in one voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepVoice {
    pub step: usize,
    pub voice: usize,
}

impl StepVoice {
    pub fn new(step: usize, voice: usize) -> Self {
        StepVoice { step, voice }
    }
}

/// Binary pianoroll of a validated sequence.
pub fn encode(
    sequence: &QuantizedSequence,
    num_steps: usize,
    min_pitch: u8,
    num_pitches: usize,
    num_voices: usize,
) -> Array4<f32> {
    let mut roll = Array4::<f32>::zeros((1, num_steps, num_pitches, num_voices));
    for note in &sequence.notes {
        let Some(pitch) = (note.pitch as usize).checked_sub(min_pitch as usize) else {
            continue;
        };
        if pitch >= num_pitches || note.instrument >= num_voices {
            continue;
        }
        let end = note.quantized_end_step.min(num_steps);
        let start = note.quantized_start_step.min(end);
        roll.slice_mut(s![0, start..end, pitch, note.instrument]).fill(1.0);
    }
    roll
}

/// One single-step note per cell above one half, ordered by step, voice,
/// pitch.
pub fn decode(roll: &Array4<f32>, min_pitch: u8) -> Vec<QuantizedNote> {
    let (_, steps, pitches, voices) = roll.dim();
    let mut notes = Vec::new();
    for step in 0..steps {
        for voice in 0..voices {
            for pitch in 0..pitches {
                if roll[[0, step, pitch, voice]] > 0.5 {
                    notes.push(QuantizedNote::new(
                        min_pitch + pitch as u8,
                        step,
                        step + 1,
                        voice,
                    ));
                }
            }
        }
    }
    notes
}

/// The cells to generate. With an explicit list, those `(step, voice)` cells
/// across all pitches (cells past the roll are ignored); otherwise every
/// `(step, voice)` with no sounding pitch.
pub fn completion_mask(roll: &Array4<f32>, infill: Option<&[StepVoice]>) -> Array4<f32> {
    let (batch, steps, pitches, voices) = roll.dim();
    let mut mask = Array4::<f32>::zeros((batch, steps, pitches, voices));
    match infill {
        Some(cells) => {
            for cell in cells {
                if cell.step < steps && cell.voice < voices {
                    mask.slice_mut(s![.., cell.step, .., cell.voice]).fill(1.0);
                }
            }
        }
        None => {
            let occupied = roll.fold_axis(Axis(2), 0.0f32, |&acc, &v| acc.max(v));
            for ((b, t, v), &o) in occupied.indexed_iter() {
                if o <= 0.0 {
                    mask.slice_mut(s![b, t, .., v]).fill(1.0);
                }
            }
        }
    }
    mask
}

/// Number of masked `(step, voice)` cells: sum over cells of the max over
/// pitch.
pub fn masked_cell_count(mask: &Array4<f32>) -> f32 {
    mask.fold_axis(Axis(2), 0.0f32, |&acc, &v| acc.max(v)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ModelSpec {
        ModelSpec {
            min_pitch: 60,
            max_pitch: 71,
            ..ModelSpec::default()
        }
    }

    fn seq(notes: Vec<QuantizedNote>, total: Option<usize>) -> QuantizedSequence {
        QuantizedSequence {
            notes,
            quantization: Some(Quantization { steps_per_quarter: 4 }),
            total_quantized_steps: total,
        }
    }

    #[test]
    fn test_num_steps_falls_back_to_last_end() {
        let s = seq(vec![QuantizedNote::new(60, 2, 7, 0)], None);
        assert_eq!(s.num_steps(), 7);
        assert_eq!(seq(vec![], Some(16)).num_steps(), 16);
    }

    #[test]
    fn test_validation_errors() {
        let spec = spec();
        let mut s = seq(vec![QuantizedNote::new(60, 0, 2, 0)], None);
        s.quantization = None;
        assert!(matches!(s.validate(&spec), Err(CoconetError::InvalidSequence(_))));
        assert!(matches!(
            seq(vec![], None).validate(&spec),
            Err(CoconetError::InvalidSequence(_))
        ));
        assert!(matches!(
            seq(vec![QuantizedNote::new(80, 0, 2, 0)], None).validate(&spec),
            Err(CoconetError::PitchOutOfRange { pitch: 80, .. })
        ));
        assert!(matches!(
            seq(vec![QuantizedNote::new(60, 0, 2, 4)], None).validate(&spec),
            Err(CoconetError::InvalidInstrument(4))
        ));
        assert!(matches!(
            seq(vec![QuantizedNote::new(60, 0, 9, 1)], Some(8)).validate(&spec),
            Err(CoconetError::StepOutOfRange { end: 9, num_steps: 8 })
        ));
        assert!(matches!(
            seq(vec![], Some(8)).validate(&spec),
            Err(CoconetError::InvalidSequence(_))
        ));
        assert_eq!(
            seq(vec![QuantizedNote::new(60, 0, 2, 1)], Some(8))
                .validate(&spec)
                .unwrap(),
            8
        );
    }

    #[test]
    fn test_encode_decode() {
        let s = seq(
            vec![QuantizedNote::new(62, 1, 3, 0), QuantizedNote::new(60, 0, 1, 3)],
            Some(4),
        );
        let roll = encode(&s, 4, 60, 12, 4);
        assert_eq!(roll.sum(), 3.0);
        assert_eq!(roll[[0, 2, 2, 0]], 1.0);
        let notes = decode(&roll, 60);
        assert_eq!(
            notes,
            vec![
                QuantizedNote::new(60, 0, 1, 3),
                QuantizedNote::new(62, 1, 2, 0),
                QuantizedNote::new(62, 2, 3, 0),
            ]
        );
    }

    #[test]
    fn test_implicit_completion_mask() {
        let s = seq(vec![QuantizedNote::new(62, 0, 2, 1)], Some(3));
        let roll = encode(&s, 3, 60, 12, 4);
        let mask = completion_mask(&roll, None);
        assert_eq!(mask.slice(s![0, 0, .., 1]).sum(), 0.0);
        assert_eq!(mask.slice(s![0, 2, .., 1]).sum(), 12.0);
        assert_eq!(mask.slice(s![0, 0, .., 0]).sum(), 12.0);
        assert_eq!(masked_cell_count(&mask), 10.0);
    }

    #[test]
    fn test_explicit_completion_mask() {
        let roll = Array4::<f32>::zeros((1, 4, 12, 4));
        let cells = [StepVoice::new(1, 2), StepVoice::new(3, 0), StepVoice::new(9, 0)];
        let mask = completion_mask(&roll, Some(&cells));
        assert_eq!(masked_cell_count(&mask), 2.0);
        assert_eq!(mask[[0, 1, 5, 2]], 1.0);
        assert_eq!(mask[[0, 1, 5, 1]], 0.0);
    }

    #[test]
    fn test_sequence_json_shape() {
        let s = seq(vec![QuantizedNote::new(60, 0, 2, 1)], Some(8));
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains(r#""quantizedStartStep":0"#));
        assert!(json.contains(r#""totalQuantizedSteps":8"#));
    }
}
