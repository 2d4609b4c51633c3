// Conversions between the editor's notes and the model's boundary types.
//
// The editor speaks in `Note`s (position + duration, typed voice, source);
// the model speaks in `QuantizedSequence` (start/end steps, instrument
// index). Masks become the explicit `(step, voice)` cell list the model
// regenerates.

use cococo_model::{Quantization, QuantizedNote, QuantizedSequence, StepVoice};
use cococo_score::masks::steps_and_voices;
use cococo_score::{Editor, Note, Voice, VoiceMasks};

/// The whole score as model input, sized to the editor's length.
pub fn to_quantized(editor: &Editor) -> QuantizedSequence {
    let notes = editor
        .notes()
        .map(|n| QuantizedNote::new(n.pitch, n.position, n.end(), n.voice.index()))
        .collect();
    QuantizedSequence {
        notes,
        quantization: Some(Quantization {
            steps_per_quarter: editor.layout().steps_per_quarter,
        }),
        total_quantized_steps: Some(editor.total_steps()),
    }
}

/// Model output as agent notes. Notes on an unknown instrument are dropped.
pub fn from_quantized(sequence: &QuantizedSequence) -> Vec<Note> {
    sequence
        .notes
        .iter()
        .filter_map(|q| {
            let Some(voice) = Voice::from_index(q.instrument) else {
                tracing::warn!(instrument = q.instrument, "dropping note on unknown voice");
                return None;
            };
            let duration = q.quantized_end_step.saturating_sub(q.quantized_start_step);
            Some(Note::agent(q.pitch, q.quantized_start_step, duration, voice))
        })
        .collect()
}

pub fn infill_cells(masks: &VoiceMasks) -> Vec<StepVoice> {
    steps_and_voices(masks)
        .into_iter()
        .map(|(step, voice)| StepVoice::new(step, voice.index()))
        .collect()
}
