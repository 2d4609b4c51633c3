// The Coconet convolutional density model.
//
// Given a pianoroll `[batch, steps, pitches, voices]` and a mask of the same
// shape (1 = "unknown, predict this"), the network outputs a probability for
// every cell. The input is the masked pianoroll concatenated with the inverted
// mask on the channel axis, so the network sees both what is known and where
// the holes are.
//
// Each layer runs, in order:
//   convolution (plain, depthwise-separable, or separable with the pointwise
//   half split into independent channel groups) →
//   folded batch norm →
//   residual connection →
//   activation →
//   optional max pooling.
//
// Residual bookkeeping follows a save/add rhythm: a counter ticks once per
// layer; on odd ticks the layer's input is saved, on even ticks it is added to
// the layer's output, except on the first and last layers. If the saved
// tensor's shape no longer matches, the buffer and counter reset.
//
// Batch norm uses population statistics only and is folded at load time into
// a per-channel `scale` and `shift` (see `NormPrecision`).
//
// All weights are validated and copied out of the checkpoint in
// `ConvNet::from_checkpoint`; `predict` takes `&self` and keeps its residual
// state on the stack, so one network can serve any number of inference tasks.

use crate::checkpoint::{Checkpoint, WeightStore};
use crate::error::{CheckpointError, CoconetError, Result};
use crate::ops;
use crate::spec::{Activation, LayerKind, LayerPlan, ModelSpec, NormPrecision};
use ndarray::{Array1, Array4, Axis, s};

#[derive(Debug, Clone)]
enum ConvWeights {
    Regular {
        weights: Array4<f32>,
    },
    Separable {
        depthwise: Array4<f32>,
        pointwise: Array4<f32>,
        biases: Option<Array1<f32>>,
    },
    Split {
        depthwise: Array4<f32>,
        /// One pointwise filter (and optional bias) per channel group.
        groups: Vec<(Array4<f32>, Option<Array1<f32>>)>,
    },
}

#[derive(Debug, Clone)]
struct ConvLayer {
    plan: LayerPlan,
    conv: ConvWeights,
    scale: Array1<f32>,
    shift: Array1<f32>,
}

#[derive(Debug, Clone)]
pub struct ConvNet {
    spec: ModelSpec,
    layers: Vec<ConvLayer>,
}

/// Fold population statistics into `x * scale + shift`.
fn fold_batch_norm(
    gamma: &Array1<f32>,
    beta: &Array1<f32>,
    mean: &Array1<f32>,
    variance: &Array1<f32>,
    epsilon: f32,
    precision: NormPrecision,
) -> (Array1<f32>, Array1<f32>) {
    let n = gamma.len();
    let mut scale = Array1::zeros(n);
    let mut shift = Array1::zeros(n);
    for c in 0..n {
        let (sc, sh) = match precision {
            NormPrecision::HostF64 => {
                let sc = gamma[c] as f64 / (variance[c] as f64 + epsilon as f64).sqrt();
                (sc as f32, (beta[c] as f64 - mean[c] as f64 * sc) as f32)
            }
            NormPrecision::Native => {
                let sc = gamma[c] / (variance[c] + epsilon).sqrt();
                (sc, beta[c] - mean[c] * sc)
            }
        };
        scale[c] = sc;
        shift[c] = sh;
    }
    (scale, shift)
}

fn optional_bias(
    weights: &WeightStore,
    name: &str,
    len: usize,
) -> std::result::Result<Option<Array1<f32>>, CheckpointError> {
    match weights.get(name) {
        Some(_) => weights.get1(name, len).map(Some),
        None => Ok(None),
    }
}

impl ConvLayer {
    fn load(plan: LayerPlan, spec: &ModelSpec, weights: &WeightStore) -> std::result::Result<Self, CheckpointError> {
        let i = plan.index;
        let [kh, kw, cin, cout] = plan.filters;
        let conv = match plan.kind {
            LayerKind::Regular => ConvWeights::Regular {
                weights: weights.get4(&format!("model/conv{i}/weights"), plan.filters)?,
            },
            LayerKind::Separable => {
                let prefix = format!("model/conv{i}/SeparableConv2d");
                ConvWeights::Separable {
                    depthwise: weights.get4(&format!("{prefix}/depthwise_filter"), [kh, kw, cin, 1])?,
                    pointwise: weights.get4(&format!("{prefix}/pointwise_filter"), [1, 1, cin, cout])?,
                    biases: optional_bias(weights, &format!("{prefix}/biases"), cout)?,
                }
            }
            LayerKind::SplitSeparable { splits } => {
                let depthwise = weights.get4(
                    &format!("model/conv{i}/SeparableConv2d/depthwise_filter"),
                    [kh, kw, cin, 1],
                )?;
                let groups = (0..splits)
                    .map(|s| {
                        let prefix = format!("model/conv{i}/split_{i}_{s}");
                        Ok((
                            weights.get4(
                                &format!("{prefix}/pointwise_filter"),
                                [1, 1, cin / splits, cout / splits],
                            )?,
                            optional_bias(weights, &format!("{prefix}/biases"), cout / splits)?,
                        ))
                    })
                    .collect::<std::result::Result<Vec<_>, CheckpointError>>()?;
                ConvWeights::Split { depthwise, groups }
            }
        };
        let stat = |name: &str| weights.get1(&format!("model/conv{i}/{name}"), cout);
        let (scale, shift) = fold_batch_norm(
            &stat("gamma")?,
            &stat("beta")?,
            &stat("popmean")?,
            &stat("popvariance")?,
            spec.batch_norm_variance_epsilon,
            spec.norm_precision,
        );
        Ok(ConvLayer {
            plan,
            conv,
            scale,
            shift,
        })
    }

    /// Convolution followed by folded batch norm.
    fn convolve(&self, x: &Array4<f32>) -> Result<Array4<f32>> {
        let dilation = self.plan.dilation;
        let mut y = match &self.conv {
            ConvWeights::Regular { weights } => ops::conv2d(x, weights, dilation)?,
            ConvWeights::Separable {
                depthwise,
                pointwise,
                biases,
            } => {
                let d = ops::depthwise_conv2d(x, depthwise, dilation)?;
                let mut y = ops::pointwise_conv2d(d.view(), pointwise)?;
                if let Some(b) = biases {
                    ops::add_bias(&mut y, b)?;
                }
                y
            }
            ConvWeights::Split { depthwise, groups } => {
                let d = ops::depthwise_conv2d(x, depthwise, dilation)?;
                let width = d.len_of(Axis(3)) / groups.len();
                let mut parts = Vec::with_capacity(groups.len());
                for (g, (pointwise, bias)) in groups.iter().enumerate() {
                    let slice = d.slice(s![.., .., .., g * width..(g + 1) * width]);
                    let mut part = ops::pointwise_conv2d(slice, pointwise)?;
                    if let Some(b) = bias {
                        ops::add_bias(&mut part, b)?;
                    }
                    parts.push(part);
                }
                let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
                ndarray::concatenate(Axis(3), &views).map_err(|e| CoconetError::Shape(e.to_string()))?
            }
        };
        ops::scale_shift(&mut y, &self.scale, &self.shift)?;
        Ok(y)
    }
}

impl ConvNet {
    /// Validate and take the weights a checkpoint's spec calls for.
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Result<ConvNet> {
        let spec = checkpoint.spec.clone();
        spec.validate()?;
        let layers = spec
            .layer_plan()
            .into_iter()
            .map(|plan| ConvLayer::load(plan, &spec, &checkpoint.weights))
            .collect::<std::result::Result<Vec<_>, CheckpointError>>()?;
        Ok(ConvNet { spec, layers })
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Probabilities for every cell given a pianoroll and a mask, both
    /// `[batch, steps, pitches, voices]`.
    pub fn predict(&self, pianoroll: &Array4<f32>, mask: &Array4<f32>) -> Result<Array4<f32>> {
        let (_, _, pitches, voices) = pianoroll.dim();
        if pianoroll.dim() != mask.dim() {
            return Err(CoconetError::Shape(format!(
                "pianoroll {:?} vs mask {:?}",
                pianoroll.shape(),
                mask.shape()
            )));
        }
        if voices != self.spec.num_instruments || pitches != self.spec.num_pitches() {
            return Err(CoconetError::Shape(format!(
                "pianoroll {:?} does not match model ({} pitches, {} voices)",
                pianoroll.shape(),
                self.spec.num_pitches(),
                self.spec.num_instruments
            )));
        }

        let known = mask.mapv(|m| 1.0 - m);
        let mut x = ops::concat_channels(&(pianoroll * &known), &known)?;

        let n = self.layers.len();
        let mut counter = 0usize;
        let mut saved: Option<Array4<f32>> = None;
        for (i, layer) in self.layers.iter().enumerate() {
            counter += 1;
            if counter % 2 == 1 {
                saved = Some(x.clone());
            }
            let mut y = layer.convolve(&x)?;

            if let Some(residual) = &saved {
                if residual.dim() != y.dim() {
                    saved = None;
                    counter = 0;
                } else if counter % 2 == 0 && i != 0 && i != n - 1 {
                    y += residual;
                }
            }

            if layer.plan.activation == Activation::Relu {
                ops::relu(&mut y);
            }
            if let Some(window) = layer.plan.pooling {
                y = ops::max_pool(&y, window)?;
            }
            x = y;
        }

        if self.spec.use_softmax_loss {
            ops::softmax(&mut x, 2);
        } else {
            ops::sigmoid(&mut x);
        }
        Ok(x)
    }
}
