// Generation gate: owns the model and at most one running job.
//
// A `Generator` holds the loaded `Coconet` (or nothing), the session RNG and
// an optional `GenerationJob`. The job's existence *is* the working flag:
// `begin` refuses while one exists, and `step` takes the job out of its slot
// for the duration of the step and only puts it back if the step succeeded
// and more work remains. Completion, any error and `abort` therefore all
// leave the generator idle.
//
// A job produces `num_candidates` alternatives one after another from the
// same snapshot, each reconciled against the generation masks and the user's
// notes as it finishes. The finished set is returned as `Candidates` with
// the original masked notes at index 0.
//
// Everything is cooperative: `step` runs one Gibbs phase and returns, so a
// host can interleave generation with other work.

use crate::candidates::Candidates;
use crate::convert;
use crate::error::{Result, StudioError};
use crate::reconcile::reconcile;
use cococo_model::{Coconet, InfillOptions, InfillProgress, InfillTask, QuantizedSequence, ShardSource};
use cococo_score::{Note, NoteSequence, VoiceMasks};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::Path;

/// Everything a generation needs, captured when it begins.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The whole score, encoded.
    pub sequence: QuantizedSequence,
    /// Per-voice steps to regenerate.
    pub masks: VoiceMasks,
    pub user_notes: Vec<Note>,
    /// The masked notes, offered back as candidate 0.
    pub original: NoteSequence,
    pub options: InfillOptions,
    pub num_candidates: usize,
}

#[derive(Debug)]
struct GenerationJob {
    request: GenerationRequest,
    task: InfillTask,
    outputs: Vec<NoteSequence>,
}

impl GenerationJob {
    fn running(&self) -> GenerationStatus {
        GenerationStatus::Running {
            candidate: self.outputs.len(),
            num_candidates: self.request.num_candidates,
            progress: self.task.progress(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationStatus {
    Idle,
    Running {
        /// Zero-based index of the output being sampled.
        candidate: usize,
        num_candidates: usize,
        progress: InfillProgress,
    },
    Finished(Candidates),
}

#[derive(Debug)]
pub struct Generator {
    model: Option<Coconet>,
    job: Option<GenerationJob>,
    rng: StdRng,
}

impl Generator {
    /// A generator with no model. Without a seed the RNG is drawn from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_os_rng(),
        };
        Generator {
            model: None,
            job: None,
            rng,
        }
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&Coconet> {
        self.model.as_ref()
    }

    /// Install a model, replacing any previous one.
    pub fn set_model(&mut self, model: Coconet) -> Result<()> {
        if self.is_working() {
            return Err(StudioError::Busy);
        }
        self.model = Some(model);
        Ok(())
    }

    pub fn load_model(&mut self, source: &dyn ShardSource) -> Result<()> {
        let model = Coconet::load(source)?;
        self.set_model(model)
    }

    pub fn load_model_dir(&mut self, path: &Path) -> Result<()> {
        let model = Coconet::load_dir(path)?;
        self.set_model(model)
    }

    /// Drop the model's weights. Refused while a job is running.
    pub fn dispose_model(&mut self) -> Result<()> {
        if self.is_working() {
            return Err(StudioError::Busy);
        }
        if self.model.take().is_some() {
            tracing::info!("model disposed");
        }
        Ok(())
    }

    pub fn is_working(&self) -> bool {
        self.job.is_some()
    }

    pub fn begin(&mut self, request: GenerationRequest) -> Result<()> {
        if self.is_working() {
            return Err(StudioError::Busy);
        }
        let model = self.model.as_ref().ok_or(StudioError::ModelNotLoaded)?;
        let task = model.begin_infill(&request.sequence, &request.options, &mut self.rng)?;
        tracing::info!(
            num_candidates = request.num_candidates,
            masked_notes = request.original.len(),
            "generation started"
        );
        self.job = Some(GenerationJob {
            request,
            task,
            outputs: Vec::new(),
        });
        Ok(())
    }

    /// Advance the running job by one sampler phase.
    pub fn step(&mut self) -> Result<GenerationStatus> {
        let Some(mut job) = self.job.take() else {
            return Ok(GenerationStatus::Idle);
        };
        if !job.task.is_done() {
            job.task.step(&mut self.rng)?;
        }
        if !job.task.is_done() {
            let status = job.running();
            self.job = Some(job);
            return Ok(status);
        }

        let GenerationJob {
            request,
            task,
            mut outputs,
        } = job;
        let generated = convert::from_quantized(&task.finish());
        outputs.push(reconcile(generated, &request.masks, &request.user_notes));

        if outputs.len() < request.num_candidates {
            let model = self.model.as_ref().ok_or(StudioError::ModelNotLoaded)?;
            let task = model.begin_infill(&request.sequence, &request.options, &mut self.rng)?;
            let job = GenerationJob {
                request,
                task,
                outputs,
            };
            let status = job.running();
            self.job = Some(job);
            return Ok(status);
        }

        tracing::info!(outputs = outputs.len(), "generation finished");
        Ok(GenerationStatus::Finished(Candidates::new(request.masks, request.original, outputs)))
    }

    /// Step until the job finishes.
    pub fn run(&mut self) -> Result<Candidates> {
        loop {
            match self.step()? {
                GenerationStatus::Running { .. } => {}
                GenerationStatus::Finished(candidates) => return Ok(candidates),
                GenerationStatus::Idle => return Err(StudioError::NoCandidates),
            }
        }
    }

    /// Discard the running job and its partial output. Returns whether
    /// there was one.
    pub fn abort(&mut self) -> bool {
        let aborted = self.job.take().is_some();
        if aborted {
            tracing::info!("generation aborted");
        }
        aborted
    }
}
