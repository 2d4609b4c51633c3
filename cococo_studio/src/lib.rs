// Cococo studio: the co-composition session around the Coconet model.
//
// A user writes some notes, masks the (voice, step) cells they want the
// model to fill, and asks for candidates. The studio snapshots the score,
// runs Coconet infilling cooperatively, reconciles the output with the
// user's notes, and offers the results alongside the original for the user
// to pick and commit. Every score and mask edit is undoable.
//
// Architecture:
// - config.rs: StudioConfig (JSON, every field defaulted)
// - convert.rs: editor notes ↔ QuantizedSequence, masks → infill cells
// - reconcile.rs: mask filter, user precedence, held-note merge
// - candidates.rs: original + generated alternatives, with a selection
// - generator.rs: model ownership and the one-job-at-a-time gate
// - studio.rs: Studio, the context object that ties it all together
// - main.rs: the `harmonize` command-line driver
//
// Score types come from `cococo_score`, inference from `cococo_model`.

pub mod candidates;
pub mod config;
pub mod convert;
pub mod error;
pub mod generator;
pub mod reconcile;
pub mod studio;

pub use candidates::Candidates;
pub use config::{GenerationConfig, Mood, StudioConfig};
pub use error::{Result, StudioError};
pub use generator::{GenerationRequest, GenerationStatus, Generator};
pub use reconcile::reconcile;
pub use studio::Studio;
