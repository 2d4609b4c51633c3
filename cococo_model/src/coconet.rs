// Infilling: the public inference entry point.
//
// `Coconet` owns a loaded ConvNet (behind an `Arc`, so running tasks can hold
// it without borrowing the model). `infill` takes a quantized sequence and
// returns a new one in which the requested cells have been regenerated; every
// other cell is carried over bit-for-bit.
//
// The pipeline, in order:
//   validate the sequence (before any tensor work) →
//   encode it to a pianoroll →
//   build the completion mask (explicit cells, or every silent cell) →
//   pick the iteration count (override, else number of masked cells) →
//   build the optional log-space prior (note nudge + mood) →
//   run the Gibbs sampler →
//   decode to one-step notes.
//
// `begin_infill` stops after the prior and hands back an `InfillTask`, which
// advances one sampler phase per `step` call and decodes on `finish`. This is
// how the studio keeps generation cooperative; `infill` is the same thing run
// to completion.

use crate::checkpoint::{Checkpoint, ShardSource};
use crate::convnet::ConvNet;
use crate::error::{CoconetError, Result};
use crate::gibbs::{GibbsPhase, GibbsSampler, iteration_count};
use crate::pianoroll::{self, Quantization, QuantizedSequence, StepVoice};
use crate::prior::{self, MoodConfig};
use crate::spec::ModelSpec;
use ndarray::Array4;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;

pub const DEFAULT_TEMPERATURE: f64 = 0.99;
/// Used when the masked cell count cannot be computed.
pub const DEFAULT_NUM_ITERATIONS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct InfillOptions {
    pub temperature: f64,
    /// Fixed iteration count; None means one per masked (step, voice) cell.
    pub num_iterations: Option<usize>,
    /// Cells to regenerate; None means every silent cell.
    pub infill_mask: Option<Vec<StepVoice>>,
    pub discourage_notes: bool,
    /// Strength of the note nudge in units of `ln 3`; zero disables it.
    pub nudge_factor: f32,
    pub mood: Option<MoodConfig>,
}

impl Default for InfillOptions {
    fn default() -> Self {
        InfillOptions {
            temperature: DEFAULT_TEMPERATURE,
            num_iterations: None,
            infill_mask: None,
            discourage_notes: false,
            nudge_factor: 0.0,
            mood: None,
        }
    }
}

/// Where a running task stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfillProgress {
    pub iteration: usize,
    pub num_iterations: usize,
    /// The phase that will run next.
    pub phase: GibbsPhase,
}

impl InfillProgress {
    pub fn is_done(&self) -> bool {
        self.phase == GibbsPhase::Done
    }
}

#[derive(Debug, Clone)]
pub struct Coconet {
    net: Arc<ConvNet>,
}

impl Coconet {
    pub fn load(source: &dyn ShardSource) -> Result<Coconet> {
        Coconet::from_checkpoint(&Checkpoint::load(source)?)
    }

    pub fn load_dir(path: &Path) -> Result<Coconet> {
        Coconet::from_checkpoint(&Checkpoint::load_dir(path)?)
    }

    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Coconet> {
        let net = ConvNet::from_checkpoint(checkpoint)?;
        tracing::info!(layers = net.num_layers(), "coconet ready");
        Ok(Coconet { net: Arc::new(net) })
    }

    pub fn spec(&self) -> &ModelSpec {
        self.net.spec()
    }

    /// Validate, encode and set up sampling without running any iterations.
    pub fn begin_infill<R: Rng + ?Sized>(
        &self,
        sequence: &QuantizedSequence,
        options: &InfillOptions,
        rng: &mut R,
    ) -> Result<InfillTask> {
        if !(options.temperature.is_finite() && options.temperature > 0.0) {
            return Err(CoconetError::InvalidTemperature(options.temperature));
        }
        let spec = self.net.spec();
        let num_steps = sequence.validate(spec)?;
        let roll = pianoroll::encode(
            sequence,
            num_steps,
            spec.min_pitch,
            spec.num_pitches(),
            spec.num_instruments,
        );
        let completion = pianoroll::completion_mask(&roll, options.infill_mask.as_deref());
        let num_iterations = options.num_iterations.unwrap_or_else(|| {
            iteration_count(pianoroll::masked_cell_count(&completion), DEFAULT_NUM_ITERATIONS)
        });

        let mut priors = Vec::new();
        if options.nudge_factor != 0.0 {
            priors.push(prior::note_nudge(
                &roll,
                &completion,
                options.nudge_factor,
                options.discourage_notes,
            ));
        }
        if let Some(mood) = &options.mood {
            priors.push(prior::mood_prior(roll.dim(), spec.min_pitch, mood, rng));
        }
        let log_prior = prior::combine(priors);

        tracing::info!(
            num_steps,
            num_iterations,
            temperature = options.temperature,
            prior = log_prior.is_some(),
            "infill started"
        );
        let sampler = GibbsSampler::new(roll, completion, log_prior, options.temperature, num_iterations);
        Ok(InfillTask {
            net: Arc::clone(&self.net),
            sampler,
            quantization: sequence.quantization,
            num_steps,
            min_pitch: spec.min_pitch,
        })
    }

    /// Regenerate the requested cells of `sequence`.
    pub fn infill<R: Rng + ?Sized>(
        &self,
        sequence: &QuantizedSequence,
        options: &InfillOptions,
        rng: &mut R,
    ) -> Result<QuantizedSequence> {
        let mut task = self.begin_infill(sequence, options, rng)?;
        task.run(rng)?;
        Ok(task.finish())
    }
}

/// A resumable infill run.
#[derive(Debug, Clone)]
pub struct InfillTask {
    net: Arc<ConvNet>,
    sampler: GibbsSampler,
    quantization: Option<Quantization>,
    num_steps: usize,
    min_pitch: u8,
}

impl InfillTask {
    pub fn progress(&self) -> InfillProgress {
        InfillProgress {
            iteration: self.sampler.iteration(),
            num_iterations: self.sampler.num_iterations(),
            phase: self.sampler.phase(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.sampler.is_done()
    }

    /// Run one sampler phase.
    pub fn step<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<InfillProgress> {
        self.sampler.step(&self.net, rng)?;
        Ok(self.progress())
    }

    pub fn run<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        self.sampler.run(&self.net, rng)
    }

    pub fn pianoroll(&self) -> &Array4<f32> {
        self.sampler.pianoroll()
    }

    pub fn completion_mask(&self) -> &Array4<f32> {
        self.sampler.completion_mask()
    }

    /// Decode the current pianoroll. Usually called once `is_done`; calling
    /// it early yields the partially sampled state.
    pub fn finish(self) -> QuantizedSequence {
        let notes = pianoroll::decode(self.sampler.pianoroll(), self.min_pitch);
        tracing::info!(notes = notes.len(), "infill finished");
        QuantizedSequence {
            notes,
            quantization: self.quantization,
            total_quantized_steps: Some(self.num_steps),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pianoroll::QuantizedNote;
    use ndarray::{Axis, s};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn tiny_model(seed: u64) -> Coconet {
        let spec = ModelSpec {
            num_filters: 8,
            num_layers: 5,
            min_pitch: 60,
            max_pitch: 71,
            ..ModelSpec::default()
        };
        let mut rng = StdRng::seed_from_u64(seed);
        Coconet::from_checkpoint(&Checkpoint::initialized(spec, &mut rng).unwrap()).unwrap()
    }

    fn melody() -> QuantizedSequence {
        QuantizedSequence {
            notes: vec![
                QuantizedNote::new(60, 0, 2, 0),
                QuantizedNote::new(64, 2, 4, 0),
                QuantizedNote::new(67, 4, 8, 0),
            ],
            quantization: Some(Quantization { steps_per_quarter: 4 }),
            total_quantized_steps: Some(8),
        }
    }

    #[test]
    fn test_infill_fills_silent_voices() {
        let model = tiny_model(1);
        let mut rng = StdRng::seed_from_u64(2);
        let out = model.infill(&melody(), &InfillOptions::default(), &mut rng).unwrap();
        assert_eq!(out.total_quantized_steps, Some(8));
        let soprano: Vec<_> = out.notes.iter().filter(|n| n.instrument == 0).collect();
        assert_eq!(soprano.len(), 8);
        // each (step, voice) holds at most one pitch
        let roll = pianoroll::encode(&out, 8, 60, 12, 4);
        let per_cell = roll.sum_axis(Axis(2));
        assert!(per_cell.iter().all(|&c| c <= 1.0));
    }

    #[test]
    fn test_cells_outside_mask_are_untouched() {
        let model = tiny_model(3);
        let mut rng = StdRng::seed_from_u64(4);
        let input = melody();
        let cells: Vec<StepVoice> = (2..6).map(|t| StepVoice::new(t, 0)).collect();
        let options = InfillOptions {
            infill_mask: Some(cells.clone()),
            ..InfillOptions::default()
        };
        let mut task = model.begin_infill(&input, &options, &mut rng).unwrap();
        let before = task.pianoroll().clone();
        let mask = task.completion_mask().clone();
        while !task.step(&mut rng).unwrap().is_done() {}
        let after = task.pianoroll().clone();
        for ((idx, &m), (&a, &b)) in mask.indexed_iter().zip(before.iter().zip(after.iter())) {
            if m == 0.0 {
                assert_eq!(a.to_bits(), b.to_bits(), "cell {idx:?} changed");
            }
        }
        assert_eq!(task.progress().num_iterations, 4);
        let out = task.finish();
        assert!(out.notes.iter().filter(|n| n.instrument > 0).count() == 0);
    }

    #[test]
    fn test_iterations_override_and_phases() {
        let model = tiny_model(5);
        let mut rng = StdRng::seed_from_u64(6);
        let options = InfillOptions {
            num_iterations: Some(2),
            ..InfillOptions::default()
        };
        let mut task = model.begin_infill(&melody(), &options, &mut rng).unwrap();
        let mut phases = Vec::new();
        while !task.is_done() {
            phases.push(task.progress().phase);
            task.step(&mut rng).unwrap();
        }
        assert_eq!(phases.len(), 8);
        assert_eq!(
            &phases[..4],
            &[
                GibbsPhase::DrawMask,
                GibbsPhase::Predict,
                GibbsPhase::Nudge,
                GibbsPhase::Sample
            ]
        );
    }

    #[test]
    fn test_invalid_sequences_are_rejected() {
        let model = tiny_model(7);
        let mut rng = StdRng::seed_from_u64(8);
        let mut unquantized = melody();
        unquantized.quantization = None;
        assert!(matches!(
            model.infill(&unquantized, &InfillOptions::default(), &mut rng),
            Err(CoconetError::InvalidSequence(_))
        ));
        let empty = QuantizedSequence {
            quantization: Some(Quantization { steps_per_quarter: 4 }),
            ..QuantizedSequence::default()
        };
        assert!(matches!(
            model.infill(&empty, &InfillOptions::default(), &mut rng),
            Err(CoconetError::InvalidSequence(_))
        ));
    }

    #[test]
    fn test_empty_sequence_with_length_is_rejected() {
        let model = tiny_model(7);
        let mut rng = StdRng::seed_from_u64(8);
        let empty = QuantizedSequence {
            notes: Vec::new(),
            quantization: Some(Quantization { steps_per_quarter: 4 }),
            total_quantized_steps: Some(8),
        };
        let options = InfillOptions {
            infill_mask: Some((0..8).map(|t| StepVoice::new(t, 1)).collect()),
            ..InfillOptions::default()
        };
        assert!(matches!(
            model.begin_infill(&empty, &options, &mut rng),
            Err(CoconetError::InvalidSequence(_))
        ));
    }

    #[test]
    fn test_non_positive_temperature_is_rejected() {
        let model = tiny_model(7);
        let mut rng = StdRng::seed_from_u64(8);
        for temperature in [0.0, -0.5, f64::NAN, f64::INFINITY] {
            let options = InfillOptions {
                temperature,
                ..InfillOptions::default()
            };
            assert!(matches!(
                model.begin_infill(&melody(), &options, &mut rng),
                Err(CoconetError::InvalidTemperature(_))
            ));
        }
    }

    #[test]
    fn test_strong_nudge_keeps_input_pitches() {
        let model = tiny_model(9);
        let mut rng = StdRng::seed_from_u64(10);
        let input = melody();
        let options = InfillOptions {
            infill_mask: Some((0..8).map(|t| StepVoice::new(t, 0)).collect()),
            nudge_factor: 40.0,
            ..InfillOptions::default()
        };
        let out = model.infill(&input, &options, &mut rng).unwrap();
        let roll_in = pianoroll::encode(&input, 8, 60, 12, 4);
        let roll_out = pianoroll::encode(&out, 8, 60, 12, 4);
        assert_eq!(
            roll_in.slice(s![0, .., .., 0]),
            roll_out.slice(s![0, .., .., 0])
        );
    }
}
