// Soft priors that bias Gibbs sampling without constraining it.
//
// A prior is a log-space tensor shaped like the pianoroll. The sampler adds
// it to the log of the model's probabilities, so priors compose by addition
// and a value of `k * ln 3` multiplies a cell's odds by `3^k`.
//
// Two priors exist:
// - note nudge: pushes the sampler toward (or, with `discourage`, away from)
//   the pitches already present in the input at each regenerated cell, which
//   makes "vary this passage" and "keep it close" requests possible;
// - mood: every `MOOD_HOLD_STEPS` steps a random diatonic triad of the
//   configured key is drawn, major-quality for a happy mood and
//   minor-quality for a sad one, and the pitches of that triad are favored in
//   every voice over that span.

use cococo_score::{Key, Triad};
use ndarray::{Array4, Zip, s};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Steps each mood triad stays in effect.
pub const MOOD_HOLD_STEPS: usize = 8;
/// Strength of the mood prior, in units of `ln 3`.
pub const MOOD_NUDGE: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoodConfig {
    pub key: Key,
    pub happy: bool,
}

impl MoodConfig {
    /// The triads this mood draws from.
    pub fn triads(&self) -> Vec<Triad> {
        if self.happy {
            self.key.happy_triads()
        } else {
            self.key.sad_triads()
        }
    }
}

/// `±factor * ln 3` wherever the input sounds a pitch inside the completion
/// mask; negative when `discourage` is set.
pub fn note_nudge(
    pianoroll: &Array4<f32>,
    completion_mask: &Array4<f32>,
    nudge_factor: f32,
    discourage: bool,
) -> Array4<f32> {
    let sign = if discourage { -1.0 } else { 1.0 };
    let weight = sign * nudge_factor * 3f32.ln();
    let mut prior = Array4::<f32>::zeros(pianoroll.raw_dim());
    Zip::from(&mut prior)
        .and(pianoroll)
        .and(completion_mask)
        .for_each(|p, &roll, &mask| {
            if roll > 0.5 && mask > 0.5 {
                *p = weight;
            }
        });
    prior
}

/// Favor the pitches of a randomly drawn triad, redrawn every
/// `MOOD_HOLD_STEPS` steps. `shape` is `(batch, steps, pitches, voices)`.
pub fn mood_prior<R: Rng + ?Sized>(
    shape: (usize, usize, usize, usize),
    min_pitch: u8,
    mood: &MoodConfig,
    rng: &mut R,
) -> Array4<f32> {
    let (_, steps, pitches, _) = shape;
    let mut prior = Array4::<f32>::zeros(shape);
    let triads = mood.triads();
    if triads.is_empty() {
        return prior;
    }
    let weight = MOOD_NUDGE * 3f32.ln();
    for start in (0..steps).step_by(MOOD_HOLD_STEPS) {
        let triad = triads[rng.random_range(0..triads.len())];
        let end = (start + MOOD_HOLD_STEPS).min(steps);
        tracing::debug!(start, root = triad.root_pc, quality = ?triad.quality, "mood triad");
        for p in 0..pitches {
            if triad.contains_pitch(min_pitch + p as u8) {
                prior.slice_mut(s![.., start..end, p, ..]).fill(weight);
            }
        }
    }
    prior
}

/// Sum the priors that are present.
pub fn combine(priors: impl IntoIterator<Item = Array4<f32>>) -> Option<Array4<f32>> {
    priors.into_iter().reduce(|acc, p| acc + p)
}
