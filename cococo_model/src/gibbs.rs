// Annealed Gibbs sampling over a pianoroll.
//
// Each iteration resamples a random subset of the cells to be completed:
//
//   1. DrawMask: the fraction `pm` of cells to resample comes from the Yao
//      schedule, which anneals linearly from `PMAX` down to `PMIN` (scaled by
//      `1 / ALPHA`). One uniform draw per (batch, step, voice) decides whether
//      that cell is in this iteration's inner mask; the decision covers every
//      pitch of the cell, and only cells in the completion mask qualify.
//   2. Predict: one ConvNet forward pass with the inner mask as "unknown".
//   3. Nudge: add the optional log-space prior.
//   4. Sample: temper the distribution (`p^(1/T)`), draw one pitch per cell
//      from its cumulative mass and write the one-hot result into exactly the
//      inner-mask cells. A cell whose mass is degenerate (zero or non-finite)
//      is left as it was for this iteration.
//
// The sampler is a state machine: `step` runs one phase and returns, so a
// host can interleave other work between phases. The number of iterations is
// fixed up front; there is no early stopping.
//
// Cells outside the completion mask are never written.

use crate::convnet::ConvNet;
use crate::error::Result;
use ndarray::{Array3, Array4, Axis, Zip, s};
use rand::Rng;

pub const PMIN: f64 = 0.1;
pub const PMAX: f64 = 0.9;
pub const ALPHA: f64 = 0.7;

/// Fraction of cells to resample at iteration `i` of `n`.
pub fn yao_schedule(i: usize, n: usize) -> f64 {
    let progress = if n == 0 { 0.0 } else { i as f64 / n as f64 };
    let p = (PMAX - (PMAX - PMIN) * progress) / ALPHA;
    p.max(PMIN)
}

/// Inner mask for one iteration: each (batch, step, voice) is selected with
/// probability `pm`, across all pitches, then restricted to the completion
/// mask.
pub fn bernoulli_mask<R: Rng + ?Sized>(completion: &Array4<f32>, pm: f64, rng: &mut R) -> Array4<f32> {
    let (b, t, p, v) = completion.dim();
    let draws = Array3::from_shape_simple_fn((b, t, v), || rng.random::<f64>());
    let mut mask = Array4::<f32>::zeros((b, t, p, v));
    for ((bi, ti, vi), &u) in draws.indexed_iter() {
        if u < pm {
            let mut cell = mask.slice_mut(s![bi, ti, .., vi]);
            cell.assign(&completion.slice(s![bi, ti, .., vi]));
        }
    }
    mask
}

/// Multiply probabilities by `exp(log_prior)`, computed in log space.
pub fn apply_prior(probs: &mut Array4<f32>, log_prior: &Array4<f32>) {
    Zip::from(probs)
        .and(log_prior)
        .for_each(|p, &lp| *p = (p.ln() + lp).exp());
}

/// One categorical draw per (batch, step, voice) over the pitch axis.
pub struct Samples {
    /// One-hot over pitch where the draw succeeded, zeros elsewhere.
    pub one_hot: Array4<f32>,
    /// Cells whose tempered mass was zero or non-finite.
    pub degenerate: Array3<bool>,
}

impl Samples {
    pub fn degenerate_count(&self) -> usize {
        self.degenerate.iter().filter(|&&d| d).count()
    }
}

/// Draw a pitch per cell from `probs^(1 / temperature)`.
pub fn sample_predictions<R: Rng + ?Sized>(probs: &Array4<f32>, temperature: f64, rng: &mut R) -> Samples {
    let (b, t, p, v) = probs.dim();
    let exponent = 1.0 / temperature;
    let mut one_hot = Array4::<f32>::zeros((b, t, p, v));
    let mut degenerate = Array3::from_elem((b, t, v), false);
    let mut cumulative = vec![0f64; p];

    for bi in 0..b {
        for ti in 0..t {
            for vi in 0..v {
                let u: f64 = rng.random();
                let lane = probs.slice(s![bi, ti, .., vi]);
                let mut total = 0f64;
                for (c, &q) in cumulative.iter_mut().zip(lane.iter()) {
                    total += (q as f64).powf(exponent);
                    *c = total;
                }
                if !total.is_finite() || total <= 0.0 {
                    degenerate[[bi, ti, vi]] = true;
                    continue;
                }
                let target = u * total;
                let pitch = cumulative.iter().position(|&c| c > target).unwrap_or(p - 1);
                one_hot[[bi, ti, pitch, vi]] = 1.0;
            }
        }
    }
    Samples { one_hot, degenerate }
}

/// Iterations for a completion mask: the number of masked (step, voice)
/// cells, or `fallback` if that count is unusable.
pub fn iteration_count(masked_cells: f32, fallback: usize) -> usize {
    if !masked_cells.is_finite() || masked_cells < 0.0 {
        tracing::warn!(masked_cells, fallback, "invalid masked cell count, using default iterations");
        return fallback;
    }
    masked_cells.round() as usize
}

/// The phase the sampler will run on its next `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GibbsPhase {
    DrawMask,
    Predict,
    Nudge,
    Sample,
    Done,
}

#[derive(Debug, Clone)]
pub struct GibbsSampler {
    pianoroll: Array4<f32>,
    completion: Array4<f32>,
    log_prior: Option<Array4<f32>>,
    temperature: f64,
    num_iterations: usize,
    iteration: usize,
    phase: GibbsPhase,
    inner_mask: Option<Array4<f32>>,
    probs: Option<Array4<f32>>,
}

impl GibbsSampler {
    pub fn new(
        pianoroll: Array4<f32>,
        completion: Array4<f32>,
        log_prior: Option<Array4<f32>>,
        temperature: f64,
        num_iterations: usize,
    ) -> Self {
        GibbsSampler {
            pianoroll,
            completion,
            log_prior,
            temperature,
            num_iterations,
            iteration: 0,
            phase: if num_iterations == 0 {
                GibbsPhase::Done
            } else {
                GibbsPhase::DrawMask
            },
            inner_mask: None,
            probs: None,
        }
    }

    pub fn phase(&self) -> GibbsPhase {
        self.phase
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    pub fn is_done(&self) -> bool {
        self.phase == GibbsPhase::Done
    }

    pub fn pianoroll(&self) -> &Array4<f32> {
        &self.pianoroll
    }

    pub fn completion_mask(&self) -> &Array4<f32> {
        &self.completion
    }

    pub fn into_pianoroll(self) -> Array4<f32> {
        self.pianoroll
    }

    /// Run the current phase and advance. Returns the phase that ran.
    pub fn step<R: Rng + ?Sized>(&mut self, net: &ConvNet, rng: &mut R) -> Result<GibbsPhase> {
        let ran = self.phase;
        match self.phase {
            GibbsPhase::DrawMask => {
                let pm = yao_schedule(self.iteration, self.num_iterations);
                tracing::debug!(iteration = self.iteration, pm, "gibbs iteration");
                self.inner_mask = Some(bernoulli_mask(&self.completion, pm, rng));
                self.phase = GibbsPhase::Predict;
            }
            GibbsPhase::Predict => {
                if let Some(mask) = &self.inner_mask {
                    self.probs = Some(net.predict(&self.pianoroll, mask)?);
                }
                self.phase = GibbsPhase::Nudge;
            }
            GibbsPhase::Nudge => {
                if let (Some(probs), Some(prior)) = (&mut self.probs, &self.log_prior) {
                    apply_prior(probs, prior);
                }
                self.phase = GibbsPhase::Sample;
            }
            GibbsPhase::Sample => {
                if let (Some(probs), Some(mask)) = (self.probs.take(), self.inner_mask.take()) {
                    self.resample(&probs, &mask, rng);
                }
                self.iteration += 1;
                self.phase = if self.iteration >= self.num_iterations {
                    GibbsPhase::Done
                } else {
                    GibbsPhase::DrawMask
                };
            }
            GibbsPhase::Done => {}
        }
        Ok(ran)
    }

    /// Step until done.
    pub fn run<R: Rng + ?Sized>(&mut self, net: &ConvNet, rng: &mut R) -> Result<()> {
        while !self.is_done() {
            self.step(net, rng)?;
        }
        Ok(())
    }

    fn resample<R: Rng + ?Sized>(&mut self, probs: &Array4<f32>, mask: &Array4<f32>, rng: &mut R) {
        let samples = sample_predictions(probs, self.temperature, rng);
        let degenerate = samples.degenerate_count();
        if degenerate > 0 {
            tracing::warn!(
                iteration = self.iteration,
                cells = degenerate,
                "degenerate distribution, cells left unchanged"
            );
        }
        let selected = mask.fold_axis(Axis(2), 0.0f32, |&acc, &m| acc.max(m));
        for ((b, t, v), &m) in selected.indexed_iter() {
            if m > 0.5 && !samples.degenerate[[b, t, v]] {
                self.pianoroll
                    .slice_mut(s![b, t, .., v])
                    .assign(&samples.one_hot.slice(s![b, t, .., v]));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_schedule_is_non_increasing() {
        for n in [1usize, 7, 32, 100] {
            let values: Vec<f64> = (0..n).map(|i| yao_schedule(i, n)).collect();
            for pair in values.windows(2) {
                assert!(pair[1] <= pair[0], "{pair:?} for n={n}");
            }
            assert!(values.iter().all(|&p| p >= PMIN));
        }
        assert_abs_diff_eq!(yao_schedule(0, 10), 0.9 / 0.7);
        assert_abs_diff_eq!(yao_schedule(10, 10), 0.1 / 0.7);
    }

    #[test]
    fn test_bernoulli_mask_respects_completion() {
        let mut completion = Array4::<f32>::zeros((1, 16, 5, 4));
        completion.slice_mut(s![0, .., .., 2]).fill(1.0);
        let mut rng = StdRng::seed_from_u64(5);
        let mask = bernoulli_mask(&completion, 1.0, &mut rng);
        assert_eq!(mask, completion);
        let mask = bernoulli_mask(&completion, 0.5, &mut rng);
        for t in 0..16 {
            let cell = mask.slice(s![0, t, .., 2]);
            let total: f32 = cell.sum();
            assert!(total == 0.0 || total == 5.0);
        }
        assert_eq!(mask.slice(s![0, .., .., 0]).sum(), 0.0);
    }

    #[test]
    fn test_sampling_picks_certain_pitch() {
        let mut probs = Array4::<f32>::zeros((1, 3, 4, 2));
        probs.slice_mut(s![.., .., 2, ..]).fill(1.0);
        let mut rng = StdRng::seed_from_u64(9);
        let samples = sample_predictions(&probs, 0.99, &mut rng);
        assert_eq!(samples.one_hot, probs);
        assert_eq!(samples.degenerate_count(), 0);
    }

    #[test]
    fn test_low_temperature_sharpens_draws() {
        let cells = 2000;
        let mut probs = Array4::<f32>::zeros((1, cells, 3, 1));
        probs.slice_mut(s![.., .., 0, ..]).fill(0.5);
        probs.slice_mut(s![.., .., 1, ..]).fill(0.3);
        probs.slice_mut(s![.., .., 2, ..]).fill(0.2);
        let top_share = |temperature: f64, seed: u64| {
            let mut rng = StdRng::seed_from_u64(seed);
            let samples = sample_predictions(&probs, temperature, &mut rng);
            assert_eq!(samples.one_hot.sum(), cells as f32);
            samples.one_hot.slice(s![0, .., 0, 0]).sum() / cells as f32
        };
        // p^10 leaves the top pitch with about 99% of the mass
        assert!(top_share(0.1, 21) > 0.97);
        let plain = top_share(1.0, 22);
        assert!((0.44..0.56).contains(&plain), "top share {plain} at T=1");
    }

    #[test]
    fn test_degenerate_cells_are_flagged() {
        let mut probs = Array4::<f32>::zeros((1, 2, 3, 1));
        probs[[0, 1, 0, 0]] = f32::NAN;
        probs[[0, 1, 1, 0]] = 0.5;
        let mut rng = StdRng::seed_from_u64(1);
        let samples = sample_predictions(&probs, 1.0, &mut rng);
        assert!(samples.degenerate[[0, 0, 0]]);
        assert!(samples.degenerate[[0, 1, 0]]);
        assert_eq!(samples.one_hot.sum(), 0.0);
    }

    #[test]
    fn test_apply_prior_scales_odds() {
        let mut probs = Array4::from_elem((1, 1, 2, 1), 0.5f32);
        let mut prior = Array4::<f32>::zeros((1, 1, 2, 1));
        prior[[0, 0, 0, 0]] = 3f32.ln();
        apply_prior(&mut probs, &prior);
        assert_abs_diff_eq!(probs[[0, 0, 0, 0]], 1.5, epsilon = 1e-5);
        assert_abs_diff_eq!(probs[[0, 0, 1, 0]], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_iteration_count() {
        assert_eq!(iteration_count(12.0, 100), 12);
        assert_eq!(iteration_count(f32::NAN, 100), 100);
        assert_eq!(iteration_count(-1.0, 100), 100);
    }

    #[test]
    fn test_zero_iterations_is_done() {
        let roll = Array4::<f32>::zeros((1, 2, 2, 4));
        let sampler = GibbsSampler::new(roll.clone(), roll, None, 1.0, 0);
        assert!(sampler.is_done());
    }
}
