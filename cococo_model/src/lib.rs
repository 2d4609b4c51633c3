// Cococo model: Coconet inference for four-voice infilling.
//
// Coconet is a convolutional density model over pianorolls, sampled with
// annealed Gibbs sampling: the network repeatedly predicts a distribution for
// a random subset of the cells still to be written, one pitch is drawn per
// cell, and the subset shrinks as sampling goes on. The result is a score in
// which the requested cells have been regenerated in context.
//
// Architecture:
// - spec.rs: ModelSpec hyperparameters, resolved into a per-layer LayerPlan
// - ops.rs: NHWC tensor primitives (dilated/depthwise/pointwise convolution,
//   pooling, softmax) on `ndarray`
// - checkpoint.rs: weights manifest + binary shards → named tensors, through
//   the ShardSource trait (directory or in-memory)
// - convnet.rs: the forward pass, with batch norm folded at load time
// - pianoroll.rs: QuantizedSequence boundary type, encode/decode, completion
//   masks
// - prior.rs: log-space note-nudge and mood priors
// - gibbs.rs: the Yao annealing schedule and the resumable sampler
// - coconet.rs: Coconet (load + infill) and the resumable InfillTask
//
// The only dependency on `cococo_score` is music theory (keys and triads for
// the mood prior); notes cross into this crate as `QuantizedSequence`.
// All randomness is injected as `&mut impl Rng`, so a seeded `StdRng` gives
// reproducible output.

pub mod checkpoint;
pub mod coconet;
pub mod convnet;
pub mod error;
pub mod gibbs;
pub mod ops;
pub mod pianoroll;
pub mod prior;
pub mod spec;

pub use checkpoint::{Checkpoint, DirectorySource, MemorySource, ShardSource, WeightStore};
pub use coconet::{Coconet, DEFAULT_NUM_ITERATIONS, DEFAULT_TEMPERATURE, InfillOptions, InfillProgress, InfillTask};
pub use convnet::ConvNet;
pub use error::{CheckpointError, CoconetError, Result};
pub use gibbs::GibbsPhase;
pub use pianoroll::{Quantization, QuantizedNote, QuantizedSequence, StepVoice};
pub use prior::MoodConfig;
pub use spec::{Activation, LayerKind, LayerPlan, LayerSpec, ModelSpec, NormPrecision};
