// Model architecture description.
//
// `ModelSpec` holds the hyperparameters of a Coconet ConvNet. The defaults
// describe the published 33-layer model (128 filters, depthwise-separable
// convolutions with a repeating dilation pattern, a pointwise-split layer in
// the middle). A checkpoint may ship a `config.json` whose camelCase fields
// override any subset of the defaults; unspecified fields keep their default
// values, and a missing `layers` list is rebuilt from the other fields.
//
// `ModelSpec::layer_plan` resolves the spec into one `LayerPlan` per layer:
// which convolution flavor to run (`LayerKind`), the filter shape, dilation,
// activation and pooling. The ConvNet and the checkpoint validator both work
// from the plan, so variable names and shapes are derived in one place.

use crate::error::CheckpointError;
use serde::{Deserialize, Serialize};

/// Lowest pitch the default model covers (C2).
pub const DEFAULT_MIN_PITCH: u8 = 36;
/// Highest pitch the default model covers (A5).
pub const DEFAULT_MAX_PITCH: u8 = 81;
pub const NUM_VOICES: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Relu,
    Identity,
}

/// Where the batch-norm scale `gamma / sqrt(var + eps)` is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormPrecision {
    /// Fold in f64 on the host, then store as f32.
    #[default]
    HostF64,
    /// Fold in f32 throughout.
    Native,
}

/// One layer as written in a spec. `filters` is `[kh, kw, in, out]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSpec {
    pub filters: [usize; 4],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dilation: Option<[usize; 2]>,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pooling: Option<[usize; 2]>,
}

impl LayerSpec {
    pub fn new(filters: [usize; 4]) -> Self {
        LayerSpec {
            filters,
            dilation: None,
            activation: Activation::Relu,
            pooling: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelSpec {
    /// Softmax over pitch per (step, voice) when true, else sigmoid per cell.
    pub use_softmax_loss: bool,
    pub batch_norm_variance_epsilon: f32,
    pub num_instruments: usize,
    pub num_filters: usize,
    pub num_layers: usize,
    /// The first this-many layers use plain convolutions; the rest are
    /// depthwise-separable.
    pub num_regular_conv_layers: usize,
    /// Per-middle-layer dilation; layers past the end of the list use [1, 1].
    pub dilation: Vec<[usize; 2]>,
    /// Explicit layers. Empty means "derive from the fields above".
    pub layers: Vec<LayerSpec>,
    pub interleave_split_every_layers: usize,
    pub num_pointwise_splits: usize,
    pub min_pitch: u8,
    pub max_pitch: u8,
    pub norm_precision: NormPrecision,
}

impl Default for ModelSpec {
    fn default() -> Self {
        let pattern = [[1, 1], [2, 2], [4, 4], [8, 8], [16, 16], [16, 32]];
        ModelSpec {
            use_softmax_loss: true,
            batch_norm_variance_epsilon: 1e-7,
            num_instruments: NUM_VOICES,
            num_filters: 128,
            num_layers: 33,
            num_regular_conv_layers: 0,
            dilation: pattern.iter().copied().cycle().take(30).collect(),
            layers: Vec::new(),
            interleave_split_every_layers: 16,
            num_pointwise_splits: 4,
            min_pitch: DEFAULT_MIN_PITCH,
            max_pitch: DEFAULT_MAX_PITCH,
            norm_precision: NormPrecision::HostF64,
        }
    }
}

/// Convolution flavor of one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Regular,
    Separable,
    /// Depthwise convolution followed by `splits` independent pointwise
    /// convolutions over equal channel groups.
    SplitSeparable { splits: usize },
}

/// A fully resolved layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerPlan {
    pub index: usize,
    pub kind: LayerKind,
    pub filters: [usize; 4],
    pub dilation: [usize; 2],
    pub activation: Activation,
    pub pooling: Option<[usize; 2]>,
}

impl LayerPlan {
    pub fn in_channels(&self) -> usize {
        self.filters[2]
    }

    pub fn out_channels(&self) -> usize {
        self.filters[3]
    }

    pub fn kernel(&self) -> [usize; 2] {
        [self.filters[0], self.filters[1]]
    }

    /// Checkpoint variable names and shapes this layer reads.
    pub fn variables(&self) -> Vec<(String, Vec<usize>)> {
        let i = self.index;
        let [kh, kw, cin, cout] = self.filters;
        let mut vars = Vec::new();
        match self.kind {
            LayerKind::Regular => {
                vars.push((format!("model/conv{i}/weights"), vec![kh, kw, cin, cout]));
            }
            LayerKind::Separable => {
                vars.push((
                    format!("model/conv{i}/SeparableConv2d/depthwise_filter"),
                    vec![kh, kw, cin, 1],
                ));
                vars.push((
                    format!("model/conv{i}/SeparableConv2d/pointwise_filter"),
                    vec![1, 1, cin, cout],
                ));
            }
            LayerKind::SplitSeparable { splits } => {
                vars.push((
                    format!("model/conv{i}/SeparableConv2d/depthwise_filter"),
                    vec![kh, kw, cin, 1],
                ));
                for s in 0..splits {
                    vars.push((
                        format!("model/conv{i}/split_{i}_{s}/pointwise_filter"),
                        vec![1, 1, cin / splits, cout / splits],
                    ));
                }
            }
        }
        for stat in ["gamma", "beta", "popmean", "popvariance"] {
            vars.push((format!("model/conv{i}/{stat}"), vec![cout]));
        }
        vars
    }
}

impl ModelSpec {
    pub fn num_pitches(&self) -> usize {
        (self.max_pitch as usize + 1).saturating_sub(self.min_pitch as usize)
    }

    /// The layer list, explicit or derived: one input layer, `num_layers - 3`
    /// dilated 3x3 layers, then two 2x2 layers, the last one linear.
    pub fn layers(&self) -> Vec<LayerSpec> {
        if !self.layers.is_empty() {
            return self.layers.clone();
        }
        let f = self.num_filters;
        let mut layers = vec![LayerSpec::new([3, 3, self.num_instruments * 2, f])];
        for i in 0..self.num_layers.saturating_sub(3) {
            layers.push(LayerSpec {
                dilation: self.dilation.get(i).copied(),
                ..LayerSpec::new([3, 3, f, f])
            });
        }
        layers.push(LayerSpec::new([2, 2, f, f]));
        layers.push(LayerSpec {
            activation: Activation::Identity,
            ..LayerSpec::new([2, 2, f, self.num_instruments])
        });
        layers
    }

    /// Whether layer `i` of `n` uses split pointwise convolutions.
    fn is_split_layer(&self, i: usize, n: usize) -> bool {
        self.interleave_split_every_layers > 0
            && self.num_pointwise_splits > 0
            && i > 0
            && i + 2 < n
            && i % (self.interleave_split_every_layers + 1) == 0
    }

    pub fn layer_plan(&self) -> Vec<LayerPlan> {
        let layers = self.layers();
        let n = layers.len();
        layers
            .into_iter()
            .enumerate()
            .map(|(i, layer)| {
                let kind = if i < self.num_regular_conv_layers {
                    LayerKind::Regular
                } else if self.is_split_layer(i, n) {
                    LayerKind::SplitSeparable {
                        splits: self.num_pointwise_splits,
                    }
                } else {
                    LayerKind::Separable
                };
                LayerPlan {
                    index: i,
                    kind,
                    filters: layer.filters,
                    dilation: layer.dilation.unwrap_or([1, 1]),
                    activation: layer.activation,
                    pooling: layer.pooling,
                }
            })
            .collect()
    }

    /// Check that the layers chain and split evenly and that the first and
    /// last layers match the pianoroll encoding.
    pub fn validate(&self) -> Result<(), CheckpointError> {
        let invalid = |msg: String| Err(CheckpointError::InvalidSpec(msg));
        if self.min_pitch > self.max_pitch {
            return invalid(format!(
                "min_pitch {} above max_pitch {}",
                self.min_pitch, self.max_pitch
            ));
        }
        let plan = self.layer_plan();
        let (Some(first), Some(last)) = (plan.first(), plan.last()) else {
            return invalid("no layers".to_string());
        };
        if first.in_channels() != self.num_instruments * 2 {
            return invalid(format!(
                "first layer takes {} channels, input has {}",
                first.in_channels(),
                self.num_instruments * 2
            ));
        }
        if last.out_channels() != self.num_instruments {
            return invalid(format!(
                "last layer yields {} channels, expected {}",
                last.out_channels(),
                self.num_instruments
            ));
        }
        for pair in plan.windows(2) {
            if pair[0].out_channels() != pair[1].in_channels() {
                return invalid(format!(
                    "layer {} yields {} channels but layer {} takes {}",
                    pair[0].index,
                    pair[0].out_channels(),
                    pair[1].index,
                    pair[1].in_channels()
                ));
            }
        }
        for layer in &plan {
            if layer.filters.contains(&0) || layer.dilation.contains(&0) {
                return invalid(format!("layer {} has a zero dimension", layer.index));
            }
            if layer.pooling.is_some_and(|p| p.contains(&0)) {
                return invalid(format!("layer {} has a zero pooling window", layer.index));
            }
            if let LayerKind::SplitSeparable { splits } = layer.kind {
                if layer.in_channels() % splits != 0 || layer.out_channels() % splits != 0 {
                    return invalid(format!(
                        "layer {} channels do not divide into {splits} splits",
                        layer.index
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layer_plan() {
        let spec = ModelSpec::default();
        let plan = spec.layer_plan();
        assert_eq!(plan.len(), 33);
        assert_eq!(plan[0].filters, [3, 3, 8, 128]);
        assert_eq!(plan[1].dilation, [1, 1]);
        assert_eq!(plan[6].dilation, [16, 32]);
        assert_eq!(plan[7].dilation, [1, 1]);
        assert_eq!(plan[31].filters, [2, 2, 128, 128]);
        assert_eq!(plan[32].filters, [2, 2, 128, 4]);
        assert_eq!(plan[32].activation, Activation::Identity);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_split_layers() {
        let plan = ModelSpec::default().layer_plan();
        let split: Vec<usize> = plan
            .iter()
            .filter(|l| matches!(l.kind, LayerKind::SplitSeparable { .. }))
            .map(|l| l.index)
            .collect();
        assert_eq!(split, vec![17]);
        assert_eq!(plan[0].kind, LayerKind::Separable);
    }

    #[test]
    fn test_regular_layers_come_first() {
        let spec = ModelSpec {
            num_regular_conv_layers: 2,
            ..ModelSpec::default()
        };
        let plan = spec.layer_plan();
        assert_eq!(plan[0].kind, LayerKind::Regular);
        assert_eq!(plan[1].kind, LayerKind::Regular);
        assert_eq!(plan[2].kind, LayerKind::Separable);
        assert_eq!(plan[0].variables()[0].0, "model/conv0/weights");
    }

    #[test]
    fn test_variable_names() {
        let plan = ModelSpec::default().layer_plan();
        let names: Vec<String> = plan[17].variables().into_iter().map(|(n, _)| n).collect();
        assert!(names.contains(&"model/conv17/split_17_3/pointwise_filter".to_string()));
        assert!(names.contains(&"model/conv17/popvariance".to_string()));
        let (_, shape) = &plan[17].variables()[1];
        assert_eq!(shape, &vec![1, 1, 32, 32]);
    }

    #[test]
    fn test_partial_config_overrides() {
        let json = r#"{"numFilters": 16, "numLayers": 5, "useSoftmaxLoss": false}"#;
        let spec: ModelSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.num_filters, 16);
        assert!(!spec.use_softmax_loss);
        assert_eq!(spec.num_instruments, 4);
        let plan = spec.layer_plan();
        assert_eq!(plan.len(), 5);
        assert_eq!(plan[2].dilation, [2, 2]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_broken_chain() {
        let spec = ModelSpec {
            layers: vec![
                LayerSpec::new([3, 3, 8, 16]),
                LayerSpec::new([3, 3, 8, 4]),
            ],
            ..ModelSpec::default()
        };
        assert!(matches!(spec.validate(), Err(CheckpointError::InvalidSpec(_))));
    }
}
