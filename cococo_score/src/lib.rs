// Cococo score model.
//
// The symbolic side of the co-composition tool: a four-voice (SATB) score on
// a grid of sixteenth-note steps, the per-voice masks that mark which steps
// the generative model may rewrite, and the undo history that brackets every
// user-visible mutation.
//
// Architecture:
// - note.rs: Note, NoteKey, Voice, Source, and the persisted NoteRecord shape
// - sequence.rs: NoteSequence with overlap trimming, held-note merging and a
//   compact text summary
// - scale.rs: Keys (tonic + major/minor), diatonic triads, pitch names
// - editor.rs: The score itself, keyed by (pitch, position), with selection,
//   playback flags, drag edits, quantization and the scale view
// - masks.rs: User masks, implicit masks, loop window, and the effective
//   generation masks handed to inference
// - history.rs: Bounded undo/redo stacks of note + mask snapshots
//
// Nothing in this crate touches tensors. The model crate (`cococo_model`)
// consumes notes through its own quantized-sequence boundary type, and the
// studio crate (`cococo_studio`) wires the two together.

pub mod editor;
pub mod error;
pub mod history;
pub mod masks;
pub mod note;
pub mod scale;
pub mod sequence;

pub use editor::{Editor, EditorLayout, ScaleRow};
pub use error::{Result, ScoreError};
pub use history::{History, Snapshot};
pub use masks::{LoopWindow, MaskMode, Masks, VoiceMasks};
pub use note::{Note, NoteId, NoteKey, NoteRecord, Source, Voice};
pub use scale::{Key, Mode, Triad, TriadQuality};
pub use sequence::NoteSequence;
